//! # Signatures
//!
//! Runtime form of the signature definitions found in the config and in
//! user signature files. A compiled signature knows its magic pattern, the
//! literal anchor the candidate locator searches for, and how to render a
//! raw classification string (description plus smart keywords) for a
//! window that matches it.

use thiserror::Error;

use crate::config::{Endian, FieldConfig, FieldKeyword, SignatureConfig};

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("signature {id}: invalid magic: {reason}")]
    InvalidMagic { id: String, reason: String },
    #[error("signature {0}: empty magic")]
    EmptyMagic(String),
    #[error("signature {0}: magic must start with a literal byte")]
    LeadingWildcard(String),
    #[error("signature {id}: unsupported field width {width}")]
    FieldWidth { id: String, width: u8 },
    #[error("invalid raw byte string: {0}")]
    RawBytes(String),
}

#[derive(Debug, Clone)]
struct Field {
    keyword: FieldKeyword,
    offset: usize,
    width: usize,
    endian: Endian,
    add: i64,
}

impl Field {
    fn compile(id: &str, cfg: &FieldConfig) -> Result<Self, SignatureError> {
        if !matches!(cfg.width, 1 | 2 | 4 | 8) {
            return Err(SignatureError::FieldWidth {
                id: id.to_string(),
                width: cfg.width,
            });
        }
        Ok(Self {
            keyword: cfg.keyword,
            offset: cfg.offset as usize,
            width: cfg.width as usize,
            endian: cfg.endian,
            add: cfg.add,
        })
    }

    fn read(&self, window: &[u8]) -> Option<u64> {
        let end = self.offset.checked_add(self.width)?;
        let bytes = window.get(self.offset..end)?;
        let mut buf = [0u8; 8];
        let value = match self.endian {
            Endian::Little => {
                buf[..self.width].copy_from_slice(bytes);
                u64::from_le_bytes(buf)
            }
            Endian::Big => {
                buf[8 - self.width..].copy_from_slice(bytes);
                u64::from_be_bytes(buf)
            }
        };
        Some(value)
    }

    /// Render this field as a smart keyword; `None` marks the match invalid.
    fn render(&self, window: &[u8]) -> Option<String> {
        let raw = self.read(window)?;
        let value = i128::from(raw) + i128::from(self.add);
        match self.keyword {
            FieldKeyword::Size if value >= 0 => Some(format!("{{size:{value}}}")),
            FieldKeyword::Jump if value >= 0 => Some(format!("{{jump-to-offset:{value}}}")),
            FieldKeyword::Adjust => Some(format!("{{offset-adjust:{value}}}")),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Signature {
    pub id: String,
    pub description: String,
    pattern: Vec<Option<u8>>,
    anchor: Vec<u8>,
    magic_offset: u64,
    fields: Vec<Field>,
}

impl Signature {
    pub fn compile(cfg: &SignatureConfig) -> Result<Self, SignatureError> {
        let pattern = parse_magic(&cfg.id, &cfg.magic)?;
        let fields = cfg
            .fields
            .iter()
            .map(|f| Field::compile(&cfg.id, f))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_pattern(&cfg.id, &cfg.description, pattern, cfg.magic_offset, fields)
    }

    /// Build a signature from a literal byte string with `\xNN` escapes.
    pub fn from_raw_bytes(raw: &str) -> Result<Self, SignatureError> {
        let bytes = unescape_raw(raw)?;
        let pattern = bytes.into_iter().map(Some).collect();
        Self::from_pattern(
            "raw",
            &format!("Raw signature ({raw})"),
            pattern,
            0,
            Vec::new(),
        )
    }

    fn from_pattern(
        id: &str,
        description: &str,
        pattern: Vec<Option<u8>>,
        magic_offset: u64,
        fields: Vec<Field>,
    ) -> Result<Self, SignatureError> {
        if pattern.is_empty() {
            return Err(SignatureError::EmptyMagic(id.to_string()));
        }
        let anchor: Vec<u8> = pattern.iter().map_while(|b| *b).collect();
        if anchor.is_empty() {
            return Err(SignatureError::LeadingWildcard(id.to_string()));
        }
        Ok(Self {
            id: id.to_string(),
            description: description.to_string(),
            pattern,
            anchor,
            magic_offset,
            fields,
        })
    }

    /// Leading literal bytes of the magic.
    pub fn anchor(&self) -> &[u8] {
        &self.anchor
    }

    pub fn matches(&self, window: &[u8]) -> bool {
        window.len() >= self.pattern.len()
            && self
                .pattern
                .iter()
                .zip(window)
                .all(|(p, b)| p.is_none_or(|p| p == *b))
    }

    /// Raw classification string for `window`, or `None` when the magic
    /// does not match.
    pub fn classify(&self, window: &[u8]) -> Option<String> {
        if !self.matches(window) {
            return None;
        }
        let mut out = self.description.clone();
        if self.magic_offset > 0 {
            out.push_str(&format!(" {{offset-adjust:-{}}}", self.magic_offset));
        }
        for field in &self.fields {
            match field.render(window) {
                Some(keyword) => {
                    out.push(' ');
                    out.push_str(&keyword);
                }
                None => out.push_str(" {invalid}"),
            }
        }
        Some(out)
    }
}

fn parse_magic(id: &str, magic: &str) -> Result<Vec<Option<u8>>, SignatureError> {
    let compact: Vec<u8> = magic.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    if compact.len() % 2 != 0 {
        return Err(SignatureError::InvalidMagic {
            id: id.to_string(),
            reason: "odd number of hex digits".to_string(),
        });
    }
    compact
        .chunks(2)
        .map(|pair| {
            if pair == b"??" {
                return Ok(None);
            }
            hex::decode(pair)
                .map(|b| Some(b[0]))
                .map_err(|e| SignatureError::InvalidMagic {
                    id: id.to_string(),
                    reason: e.to_string(),
                })
        })
        .collect()
}

fn unescape_raw(raw: &str) -> Result<Vec<u8>, SignatureError> {
    let src = raw.as_bytes();
    let mut out = Vec::with_capacity(src.len());
    let mut i = 0usize;
    while i < src.len() {
        if src[i] == b'\\' && i + 1 < src.len() {
            match src[i + 1] {
                b'x' | b'X' => {
                    let digits = src
                        .get(i + 2..i + 4)
                        .ok_or_else(|| SignatureError::RawBytes(raw.to_string()))?;
                    let byte = hex::decode(digits)
                        .map_err(|_| SignatureError::RawBytes(raw.to_string()))?;
                    out.push(byte[0]);
                    i += 4;
                    continue;
                }
                b'\\' => {
                    out.push(b'\\');
                    i += 2;
                    continue;
                }
                _ => {}
            }
        }
        out.push(src[i]);
        i += 1;
    }
    Ok(out)
}

/// Ordered collection of compiled signatures; earlier entries win ties.
#[derive(Debug, Clone, Default)]
pub struct SignatureSet {
    signatures: Vec<Signature>,
}

impl SignatureSet {
    pub fn new(signatures: Vec<Signature>) -> Self {
        Self { signatures }
    }

    pub fn compile(configs: &[SignatureConfig]) -> Result<Self, SignatureError> {
        let signatures = configs
            .iter()
            .map(Signature::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { signatures })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Signature> {
        self.signatures.iter()
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(magic: &str) -> SignatureConfig {
        SignatureConfig {
            id: "t".to_string(),
            description: "Test header".to_string(),
            magic: magic.to_string(),
            magic_offset: 0,
            fields: Vec::new(),
        }
    }

    #[test]
    fn wildcard_magic_matches_any_byte() {
        let sig = Signature::compile(&cfg("42 5a 68 ?? 31")).expect("compile");
        assert_eq!(sig.anchor(), b"BZh");
        assert!(sig.matches(b"BZh91AY"));
        assert!(sig.matches(b"BZh11"));
        assert!(!sig.matches(b"BZh9"));
        assert!(!sig.matches(b"BZx91"));
    }

    #[test]
    fn rejects_bad_magic() {
        assert!(matches!(
            Signature::compile(&cfg("??41")),
            Err(SignatureError::LeadingWildcard(_))
        ));
        assert!(matches!(
            Signature::compile(&cfg("")),
            Err(SignatureError::EmptyMagic(_))
        ));
        assert!(matches!(
            Signature::compile(&cfg("abc")),
            Err(SignatureError::InvalidMagic { .. })
        ));
        assert!(matches!(
            Signature::compile(&cfg("zz")),
            Err(SignatureError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn renders_fields_as_keywords() {
        let mut c = cfg("cafe");
        c.fields = vec![
            FieldConfig {
                keyword: FieldKeyword::Size,
                offset: 2,
                width: 2,
                endian: Endian::Big,
                add: 4,
            },
            FieldConfig {
                keyword: FieldKeyword::Jump,
                offset: 4,
                width: 4,
                endian: Endian::Little,
                add: 0,
            },
        ];
        let sig = Signature::compile(&c).expect("compile");
        let window = [0xca, 0xfe, 0x00, 0x10, 0x20, 0x00, 0x00, 0x00];
        assert_eq!(
            sig.classify(&window).expect("match"),
            "Test header {size:20} {jump-to-offset:32}"
        );
    }

    #[test]
    fn truncated_field_marks_invalid() {
        let mut c = cfg("cafe");
        c.fields = vec![FieldConfig {
            keyword: FieldKeyword::Size,
            offset: 2,
            width: 4,
            endian: Endian::Little,
            add: 0,
        }];
        let sig = Signature::compile(&c).expect("compile");
        assert_eq!(
            sig.classify(&[0xca, 0xfe, 0x01]).expect("match"),
            "Test header {invalid}"
        );
    }

    #[test]
    fn magic_offset_becomes_negative_adjust() {
        let mut c = cfg("7573746172");
        c.magic_offset = 257;
        let sig = Signature::compile(&c).expect("compile");
        assert_eq!(
            sig.classify(b"ustar\0").expect("match"),
            "Test header {offset-adjust:-257}"
        );
    }

    #[test]
    fn raw_bytes_unescape() {
        let sig = Signature::from_raw_bytes("\\x1f\\x8bAB").expect("raw");
        assert_eq!(sig.anchor(), &[0x1f, 0x8b, b'A', b'B']);
        assert!(Signature::from_raw_bytes("\\x1").is_err());
        assert!(Signature::from_raw_bytes("").is_err());
    }
}
