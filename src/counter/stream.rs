use auto_impl::auto_impl;

/// A source of fixed-width nucleotide windows
///
/// This is the contract between the counter and whatever tokenizes the input
/// (FASTA/FASTQ parsing lives outside of this crate). Each stream is one
/// partition of the input and is consumed by exactly one worker thread.
///
/// Windows containing symbols other than A, C, G, T may be yielded; workers
/// skip them.
#[auto_impl(&mut, Box)]
pub trait KmerStream: Send {
    /// Returns the next window, or `None` at the end of the partition
    fn next_window(&mut self) -> Option<&[u8]>;
}

/// Slides a k-wide window over a set of in-memory sequences
#[derive(Debug, Clone)]
pub struct SequenceWindows {
    sequences: Vec<Vec<u8>>,
    k: usize,
    /// Index of the current sequence
    seq_idx: usize,
    /// Start of the next window in the current sequence
    pos: usize,
}
impl SequenceWindows {
    #[must_use]
    pub fn new(sequences: Vec<Vec<u8>>, k: usize) -> Self {
        Self {
            sequences,
            k,
            seq_idx: 0,
            pos: 0,
        }
    }

    /// Splits `sequences` round-robin into at most `n` non-empty streams
    #[must_use]
    pub fn partition(sequences: Vec<Vec<u8>>, k: usize, n: usize) -> Vec<Self> {
        let n = n.max(1).min(sequences.len().max(1));
        let mut parts: Vec<Vec<Vec<u8>>> = (0..n).map(|_| Vec::new()).collect();
        for (idx, seq) in sequences.into_iter().enumerate() {
            parts[idx % n].push(seq);
        }
        parts
            .into_iter()
            .filter(|part| !part.is_empty())
            .map(|part| Self::new(part, k))
            .collect()
    }

    /// Number of windows this stream yields in total
    #[must_use]
    pub fn num_windows(&self) -> usize {
        self.sequences
            .iter()
            .map(|seq| (seq.len() + 1).saturating_sub(self.k))
            .sum()
    }
}
impl KmerStream for SequenceWindows {
    fn next_window(&mut self) -> Option<&[u8]> {
        if self.k == 0 {
            return None;
        }
        loop {
            let len = self.sequences.get(self.seq_idx)?.len();
            if self.pos + self.k <= len {
                let start = self.pos;
                self.pos += 1;
                return Some(&self.sequences[self.seq_idx][start..start + self.k]);
            }
            self.seq_idx += 1;
            self.pos = 0;
        }
    }
}

#[cfg(test)]
mod testing {
    use super::*;

    fn drain<S: KmerStream>(mut stream: S) -> Vec<Vec<u8>> {
        let mut windows = Vec::new();
        while let Some(window) = stream.next_window() {
            windows.push(window.to_vec());
        }
        windows
    }

    #[test]
    fn test_windows() {
        let stream = SequenceWindows::new(vec![b"ACGTA".to_vec(), b"GG".to_vec(), b"TTT".to_vec()], 3);
        assert_eq!(stream.num_windows(), 4);
        assert_eq!(
            drain(stream),
            vec![b"ACG".to_vec(), b"CGT".to_vec(), b"GTA".to_vec(), b"TTT".to_vec()]
        );
    }

    #[test]
    fn test_stream_through_references() {
        let mut stream = SequenceWindows::new(vec![b"ACGT".to_vec()], 2);
        assert_eq!(drain(&mut stream).len(), 3);
        assert!(stream.next_window().is_none());

        let boxed: Box<dyn KmerStream> = Box::new(SequenceWindows::new(vec![b"ACGT".to_vec()], 4));
        assert_eq!(drain(boxed), vec![b"ACGT".to_vec()]);
    }

    #[test]
    fn test_partition() {
        let sequences: Vec<Vec<u8>> = (0..5).map(|_| b"ACGTACGT".to_vec()).collect();
        let parts = SequenceWindows::partition(sequences.clone(), 4, 2);
        assert_eq!(parts.len(), 2);
        let total: usize = parts.iter().map(SequenceWindows::num_windows).sum();
        assert_eq!(total, 25);

        // never more streams than sequences
        assert_eq!(SequenceWindows::partition(sequences, 4, 16).len(), 5);
        assert!(SequenceWindows::partition(Vec::new(), 4, 3).is_empty());
    }
}
