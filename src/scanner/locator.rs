use memchr::memmem;

use crate::scanner::CandidateLocator;
use crate::signature::SignatureSet;

/// Finds every position where some signature's literal anchor occurs.
pub struct PrefixLocator {
    finders: Vec<memmem::Finder<'static>>,
}

impl PrefixLocator {
    pub fn new(signatures: &SignatureSet) -> Self {
        let mut anchors: Vec<Vec<u8>> = signatures.iter().map(|s| s.anchor().to_vec()).collect();
        anchors.sort();
        anchors.dedup();
        let finders = anchors
            .iter()
            .map(|a| memmem::Finder::new(a).into_owned())
            .collect();
        Self { finders }
    }
}

impl CandidateLocator for PrefixLocator {
    fn find_candidates(&self, data: &[u8], len: usize) -> Vec<usize> {
        let end = len.min(data.len());
        let mut offsets = Vec::new();
        for finder in &self.finders {
            // Anchors may run into the trailing peek; only their start must
            // fall inside the block.
            offsets.extend(finder.find_iter(data).take_while(|&idx| idx < end));
        }
        offsets.sort_unstable();
        offsets.dedup();
        offsets
    }
}
