use crate::scanner::SignatureMatcher;
use crate::signature::SignatureSet;

/// Separator between the parts of a multi-result classification.
pub const PART_SEPARATOR: &str = "\n- ";

/// Classifies a window against every compiled signature. All signatures
/// matching the same window are reported as one multi-part string, first
/// signature first.
pub struct MagicMatcher {
    signatures: SignatureSet,
}

impl MagicMatcher {
    pub fn new(signatures: SignatureSet) -> Self {
        Self { signatures }
    }

    pub fn signatures(&self) -> &SignatureSet {
        &self.signatures
    }
}

impl SignatureMatcher for MagicMatcher {
    fn classify(&self, window: &[u8]) -> Vec<String> {
        let parts: Vec<String> = self
            .signatures
            .iter()
            .filter_map(|sig| sig.classify(window))
            .collect();
        if parts.is_empty() {
            return Vec::new();
        }
        vec![parts.join(PART_SEPARATOR)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::Signature;

    #[test]
    fn joins_multiple_hits() {
        let set = SignatureSet::new(vec![
            Signature::from_raw_bytes("AB").expect("sig"),
            Signature::from_raw_bytes("ABC").expect("sig"),
            Signature::from_raw_bytes("X").expect("sig"),
        ]);
        let matcher = MagicMatcher::new(set);
        assert_eq!(
            matcher.classify(b"ABCD"),
            vec!["Raw signature (AB)\n- Raw signature (ABC)".to_string()]
        );
        assert!(matcher.classify(b"QQ").is_empty());
    }
}
