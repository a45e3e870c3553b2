//! A growable bit set keyed by bounds index.
//!
//! The registry tracks per-step added/updated/removed volumes in these maps;
//! they are parsed once per step and then cleared.

#[derive(Debug, Default, Clone)]
pub(crate) struct BitMap {
    words: Vec<u64>,
}

impl BitMap {
    pub fn new() -> BitMap {
        BitMap::default()
    }

    pub fn set(&mut self, index: u32) {
        let word = (index / 64) as usize;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << (index % 64);
    }

    pub fn reset(&mut self, index: u32) {
        let word = (index / 64) as usize;
        if word < self.words.len() {
            self.words[word] &= !(1 << (index % 64));
        }
    }

    /// Bounded test: indices past the end read as unset.
    pub fn test(&self, index: u32) -> bool {
        let word = (index / 64) as usize;
        word < self.words.len() && self.words[word] & (1 << (index % 64)) != 0
    }

    pub fn clear(&mut self) {
        self.words.clear();
    }

    /// Visit set bits in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.words.iter().enumerate().flat_map(|(w, &bits)| {
            let mut bits = bits;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let bit = bits.trailing_zeros();
                bits &= bits - 1;
                Some(w as u32 * 64 + bit)
            })
        })
    }
}
