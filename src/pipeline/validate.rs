use crate::scanner::Match;

/// Bounds check a match against its target's file length. Only ever
/// clears `valid`; a match that arrives invalid stays invalid.
pub fn validate(m: &mut Match) {
    let file_len = i128::from(m.target.len);
    let offset = i128::from(m.offset);

    if m.description.trim().is_empty() {
        m.valid = false;
    }
    if offset < 0 {
        m.valid = false;
    }
    if let Some(size) = m.size {
        if offset + i128::from(size) > file_len {
            m.valid = false;
        }
    }
    if let Some(jump) = m.jump {
        if offset + i128::from(jump) > file_len {
            m.valid = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use super::validate;
    use crate::scanner::{Classification, Match};
    use crate::stream::TargetInfo;

    fn target(len: u64) -> Arc<TargetInfo> {
        Arc::new(TargetInfo {
            path: PathBuf::from("target.bin"),
            len,
            depth: 0,
        })
    }

    fn checked(cls: Classification, position: u64) -> Match {
        let mut m = Match::new(cls, position, target(100));
        validate(&mut m);
        m
    }

    #[test]
    fn size_within_file_is_valid() {
        let mut cls = Classification::new("header");
        cls.size = Some(50);
        assert!(checked(cls, 10).valid);
    }

    #[test]
    fn size_past_end_is_invalid() {
        let mut cls = Classification::new("header");
        cls.size = Some(50);
        assert!(!checked(cls, 60).valid);
    }

    #[test]
    fn size_ending_exactly_at_eof_is_valid() {
        let mut cls = Classification::new("header");
        cls.size = Some(40);
        assert!(checked(cls, 60).valid);
    }

    #[test]
    fn jump_past_end_is_invalid() {
        let mut cls = Classification::new("header");
        cls.jump = Some(91);
        assert!(!checked(cls, 10).valid);
    }

    #[test]
    fn empty_description_is_invalid() {
        assert!(!checked(Classification::new(""), 0).valid);
        assert!(!checked(Classification::new("   "), 0).valid);
    }

    #[test]
    fn negative_offset_is_invalid() {
        let mut cls = Classification::new("POSIX tar archive");
        cls.adjust = -257;
        let m = checked(cls, 100);
        assert_eq!(m.offset, -157);
        assert!(!m.valid);
    }

    #[test]
    fn translator_invalid_stays_invalid() {
        let mut cls = Classification::new("header");
        cls.valid = false;
        assert!(!checked(cls, 0).valid);
    }
}
