//! Raw directory data: search results and attribute changes.

use std::collections::HashMap;

/// Attribute holding the AD password.
pub const PASSWORD_ATTRIBUTE: &str = "unicodePwd";
/// Attribute holding the small profile photo.
pub const THUMBNAIL_ATTRIBUTE: &str = "thumbnailPhoto";
/// Attribute holding the full size profile photo.
pub const JPEG_ATTRIBUTE: &str = "jpegPhoto";

/// Search result entry.
///
/// Attribute names are compared case-insensitively, as the protocol does.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attrs: HashMap<String, Vec<String>>,
    pub bin_attrs: HashMap<String, Vec<Vec<u8>>>,
}

impl DirectoryEntry {
    /// Create an entry without attributes.
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            ..Default::default()
        }
    }

    /// Add a text value.
    pub fn with_attr(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.attrs.entry(name.into()).or_default().push(value.into());
        self
    }

    /// Add a binary value.
    pub fn with_bin_attr(
        mut self,
        name: impl Into<String>,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        self.bin_attrs
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    /// Every text value of `name`.
    pub fn values(&self, name: &str) -> &[String] {
        self.attrs
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
            .unwrap_or_default()
    }

    /// First text value of `name`.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.values(name).first().map(String::as_str)
    }

    /// First binary value of `name`.
    ///
    /// Servers report attributes that are not valid UTF-8 as binary only, so
    /// a text value is used as a fallback.
    pub fn first_bytes(&self, name: &str) -> Option<&[u8]> {
        self.bin_attrs
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .and_then(|(_, values)| values.first())
            .map(Vec::as_slice)
            .or_else(|| self.first(name).map(str::as_bytes))
    }
}

/// Operation applied by an [`AttributeChange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Replace,
}

/// One instruction of a modify request.
#[derive(Clone, PartialEq, Eq)]
pub struct AttributeChange {
    pub attribute: String,
    pub kind: ChangeKind,
    pub values: Vec<Vec<u8>>,
}

impl AttributeChange {
    /// Replace every value of `attribute`.
    pub fn replace(attribute: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            attribute: attribute.into(),
            kind: ChangeKind::Replace,
            values: vec![value],
        }
    }

    /// Replace the AD password.
    pub fn password(secret: &str) -> Self {
        Self::replace(PASSWORD_ATTRIBUTE, encode_password(secret))
    }

    /// Replace the profile thumbnail.
    pub fn thumbnail(bytes: Vec<u8>) -> Self {
        Self::replace(THUMBNAIL_ATTRIBUTE, bytes)
    }

    /// Replace the full size photo.
    pub fn jpeg(bytes: Vec<u8>) -> Self {
        Self::replace(JPEG_ATTRIBUTE, bytes)
    }

    /// Whether the change rotates a secret.
    pub fn is_secret(&self) -> bool {
        self.attribute.eq_ignore_ascii_case(PASSWORD_ATTRIBUTE)
    }
}

// Values may hold a password.
impl std::fmt::Debug for AttributeChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeChange")
            .field("attribute", &self.attribute)
            .field("kind", &self.kind)
            .field(
                "sizes",
                &self.values.iter().map(Vec::len).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Encode a password for `unicodePwd`: quoted, then UTF-16LE.
pub fn encode_password(secret: &str) -> Vec<u8> {
    format!("\"{secret}\"")
        .encode_utf16()
        .flat_map(u16::to_le_bytes)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_password() {
        assert_eq!(
            encode_password("ab"),
            vec![0x22, 0x00, 0x61, 0x00, 0x62, 0x00, 0x22, 0x00]
        );
        // Non-BMP characters use surrogate pairs.
        let encoded = encode_password("😀");
        assert_eq!(encoded.len(), 2 + 4 + 2);
        assert_eq!(&encoded[2..6], &[0x3d, 0xd8, 0x00, 0xde]);
    }

    #[test]
    fn test_password_change() {
        let change = AttributeChange::password("N3w-Secret!");
        assert!(change.is_secret());
        assert_eq!(change.kind, ChangeKind::Replace);
        assert_eq!(change.values, vec![encode_password("N3w-Secret!")]);
        assert!(!format!("{change:?}").contains("N3w"));
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let entry = DirectoryEntry::new("CN=jdoe,CN=Users,DC=corp,DC=com")
            .with_attr("sAMAccountName", "jdoe")
            .with_bin_attr("thumbnailPhoto", vec![1, 2, 3]);

        assert_eq!(entry.first("samaccountname"), Some("jdoe"));
        assert_eq!(entry.first_bytes("THUMBNAILPHOTO"), Some(&[1, 2, 3][..]));
        assert!(entry.values("mail").is_empty());
        assert_eq!(entry.first_bytes("sAMAccountName"), Some(&b"jdoe"[..]));
    }
}
