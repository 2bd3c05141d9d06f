//! Per-order n-gram record tables.
//!
//! Records are stored in one contiguous array per order. Higher orders are
//! reached through the `next` offset of the shorter context, so the whole
//! model is three arenas linked by integer offsets rather than pointers:
//!
//! ```text
//! unigrams[w1].next .. unigrams[w1 + 1].next   -> bigrams with context w1
//! bigrams[i].next   .. bigrams[i + 1].next     -> trigrams with context bigram i
//! ```
//!
//! Every lower order carries one trailing sentinel record so the range of
//! its last real entry is well defined. Inside a range, records are sorted
//! by word id and looked up with a binary search.
use std::ops::Range;

use crate::error::{LmError, LmResult};
use crate::vocab::WordId;

/// Highest n-gram order the engine handles.
pub const MAX_ORDER: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Unigram {
    pub prob: i32,
    pub backoff: i32,
    /// First bigram whose context is this word.
    pub next: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bigram {
    pub word: WordId,
    pub prob: i32,
    pub backoff: i32,
    /// First trigram whose context is this bigram.
    pub next: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Trigram {
    pub word: WordId,
    pub prob: i32,
}

/// An n-gram as parsed from a text model, before it is placed in the arenas.
///
/// `words[..order]` holds the ids in reading order (context first).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawNgram {
    pub words: [WordId; 3],
    pub prob: i32,
    pub backoff: i32,
}

impl RawNgram {
    pub fn bigram(w1: WordId, w2: WordId, prob: i32, backoff: i32) -> Self {
        Self {
            words: [w1, w2, 0],
            prob,
            backoff,
        }
    }

    pub fn trigram(w1: WordId, w2: WordId, w3: WordId, prob: i32) -> Self {
        Self {
            words: [w1, w2, w3],
            prob,
            backoff: 0,
        }
    }
}

/// Immutable record storage for a model of order 1 to 3.
#[derive(Debug, Clone)]
pub struct NgramTables {
    order: u8,
    unigrams: Vec<Unigram>,
    bigrams: Vec<Bigram>,
    trigrams: Vec<Trigram>,
}

impl NgramTables {
    /// Build the arenas from parsed records.
    ///
    /// `unigrams[w] = (prob, backoff)` for every word id. Bigrams and
    /// trigrams may arrive in any order; they are sorted here. A trigram
    /// whose bigram prefix is missing gets a prefix synthesized from the
    /// unigram backoff so it stays reachable.
    pub fn build(
        order: u8,
        unigrams: Vec<(i32, i32)>,
        mut bigrams: Vec<RawNgram>,
        mut trigrams: Vec<RawNgram>,
    ) -> LmResult<Self> {
        check_order(order)?;
        let n_words = unigrams.len();
        if n_words == 0 {
            return Err(LmError::format("model has no unigrams"));
        }
        if (order < 2 && !bigrams.is_empty()) || (order < 3 && !trigrams.is_empty()) {
            return Err(LmError::format(format!(
                "n-grams above the declared order {}",
                order
            )));
        }
        for (raw, n) in bigrams
            .iter()
            .map(|r| (r, 2))
            .chain(trigrams.iter().map(|r| (r, 3)))
        {
            if let Some(&w) = raw.words[..n].iter().find(|&&w| w as usize >= n_words) {
                return Err(LmError::format(format!(
                    "{}-gram refers to word id {} outside the vocabulary",
                    n, w
                )));
            }
        }

        bigrams.sort_unstable_by_key(|r| (r.words[0], r.words[1]));
        if let Some(pair) = bigrams
            .windows(2)
            .find(|p| p[0].words[..2] == p[1].words[..2])
        {
            return Err(LmError::format(format!(
                "duplicate bigram ({}, {})",
                pair[0].words[0], pair[0].words[1]
            )));
        }
        trigrams.sort_unstable_by_key(|r| r.words);
        if let Some(pair) = trigrams.windows(2).find(|p| p[0].words == p[1].words) {
            return Err(LmError::format(format!(
                "duplicate trigram ({}, {}, {})",
                pair[0].words[0], pair[0].words[1], pair[0].words[2]
            )));
        }

        let mut missing: Vec<RawNgram> = Vec::new();
        for t in &trigrams {
            let prefix = (t.words[0], t.words[1]);
            if missing
                .last()
                .is_some_and(|m| (m.words[0], m.words[1]) == prefix)
            {
                continue;
            }
            if bigrams
                .binary_search_by_key(&prefix, |b| (b.words[0], b.words[1]))
                .is_err()
            {
                let (_, bo) = unigrams[prefix.0 as usize];
                let (p, _) = unigrams[prefix.1 as usize];
                missing.push(RawNgram::bigram(prefix.0, prefix.1, bo.saturating_add(p), 0));
            }
        }
        if !missing.is_empty() {
            tracing::warn!(
                count = missing.len(),
                "trigrams without a bigram prefix; synthesized prefix bigrams"
            );
            bigrams.extend(missing);
            bigrams.sort_unstable_by_key(|r| (r.words[0], r.words[1]));
        }

        let mut uni_recs = Vec::with_capacity(n_words + 1);
        let mut pos = 0usize;
        for (w, &(prob, backoff)) in unigrams.iter().enumerate() {
            uni_recs.push(Unigram {
                prob,
                backoff,
                next: pos as u32,
            });
            while pos < bigrams.len() && bigrams[pos].words[0] as usize == w {
                pos += 1;
            }
        }
        uni_recs.push(Unigram {
            next: pos as u32,
            ..Unigram::default()
        });

        let mut bi_recs = Vec::new();
        if order >= 2 {
            bi_recs.reserve_exact(bigrams.len() + 1);
            let mut pos = 0usize;
            for b in &bigrams {
                bi_recs.push(Bigram {
                    word: b.words[1],
                    prob: b.prob,
                    backoff: b.backoff,
                    next: pos as u32,
                });
                while pos < trigrams.len() && trigrams[pos].words[..2] == b.words[..2] {
                    pos += 1;
                }
            }
            if pos != trigrams.len() {
                return Err(LmError::format("trigram table is not reachable from bigrams"));
            }
            bi_recs.push(Bigram {
                next: pos as u32,
                ..Bigram::default()
            });
        }

        let tri_recs: Vec<Trigram> = trigrams
            .iter()
            .map(|t| Trigram {
                word: t.words[2],
                prob: t.prob,
            })
            .collect();

        Ok(Self {
            order,
            unigrams: uni_recs,
            bigrams: bi_recs,
            trigrams: tri_recs,
        })
    }

    /// Assemble arenas that were decoded directly from a binary model.
    ///
    /// The arrays must already include their sentinels. Offsets and word ids
    /// are validated so lookups can never index out of bounds.
    pub fn from_parts(
        order: u8,
        unigrams: Vec<Unigram>,
        bigrams: Vec<Bigram>,
        trigrams: Vec<Trigram>,
    ) -> LmResult<Self> {
        check_order(order)?;
        if unigrams.len() < 2 {
            return Err(LmError::format("unigram table is empty"));
        }
        let n_words = unigrams.len() - 1;
        let n_bigrams = if order >= 2 {
            if bigrams.is_empty() {
                return Err(LmError::format("bigram table is missing its sentinel"));
            }
            bigrams.len() - 1
        } else {
            if !bigrams.is_empty() {
                return Err(LmError::format("bigrams present in a unigram model"));
            }
            0
        };
        if order < 3 && !trigrams.is_empty() {
            return Err(LmError::format("trigrams present in a model below order 3"));
        }

        check_links(
            "unigram",
            unigrams.iter().map(|u| u.next),
            n_bigrams,
            |range| bigrams[range].iter().map(|b| b.word),
            n_words,
        )?;
        if order >= 2 {
            check_links(
                "bigram",
                bigrams.iter().map(|b| b.next),
                trigrams.len(),
                |range| trigrams[range].iter().map(|t| t.word),
                n_words,
            )?;
        }

        Ok(Self {
            order,
            unigrams,
            bigrams,
            trigrams,
        })
    }

    pub fn order(&self) -> u8 {
        self.order
    }

    /// Number of real records per order (sentinels excluded).
    pub fn counts(&self) -> [usize; 3] {
        [
            self.unigrams.len() - 1,
            self.bigrams.len().saturating_sub(1),
            self.trigrams.len(),
        ]
    }

    pub fn n_words(&self) -> usize {
        self.unigrams.len() - 1
    }

    pub fn contains_word(&self, w: WordId) -> bool {
        (w as usize) < self.n_words()
    }

    /// Unigram record for `w`. Panics if `w` is outside the vocabulary.
    pub fn unigram(&self, w: WordId) -> &Unigram {
        &self.unigrams[w as usize]
    }

    /// Unigram records including the trailing sentinel.
    pub fn unigrams(&self) -> &[Unigram] {
        &self.unigrams
    }

    /// Bigram records including the trailing sentinel (empty below order 2).
    pub fn bigrams(&self) -> &[Bigram] {
        &self.bigrams
    }

    pub fn trigrams(&self) -> &[Trigram] {
        &self.trigrams
    }

    pub fn bigram(&self, idx: usize) -> &Bigram {
        &self.bigrams[idx]
    }

    pub fn trigram(&self, idx: usize) -> &Trigram {
        &self.trigrams[idx]
    }

    fn bigram_range(&self, w1: WordId) -> Range<usize> {
        let u = w1 as usize;
        self.unigrams[u].next as usize..self.unigrams[u + 1].next as usize
    }

    fn trigram_range(&self, bigram: usize) -> Range<usize> {
        self.bigrams[bigram].next as usize..self.bigrams[bigram + 1].next as usize
    }

    /// Index of bigram `(w1, w2)`.
    pub fn find_bigram(&self, w1: WordId, w2: WordId) -> Option<usize> {
        if self.order < 2 {
            return None;
        }
        let range = self.bigram_range(w1);
        let start = range.start;
        self.bigrams[range]
            .binary_search_by_key(&w2, |b| b.word)
            .ok()
            .map(|i| start + i)
    }

    /// Index of the trigram continuing bigram `bigram` with `w3`.
    pub fn find_trigram(&self, bigram: usize, w3: WordId) -> Option<usize> {
        if self.order < 3 {
            return None;
        }
        let range = self.trigram_range(bigram);
        let start = range.start;
        self.trigrams[range]
            .binary_search_by_key(&w3, |t| t.word)
            .ok()
            .map(|i| start + i)
    }

    /// All bigrams as `(w1, record)`, sorted by `(w1, w2)`.
    pub fn iter_bigrams(&self) -> impl Iterator<Item = (WordId, &Bigram)> + '_ {
        (0..self.n_words() as WordId).flat_map(move |w1| {
            self.bigrams[self.bigram_range(w1)]
                .iter()
                .map(move |b| (w1, b))
        })
    }

    /// All trigrams as `(w1, w2, record)`, sorted by `(w1, w2, w3)`.
    pub fn iter_trigrams(&self) -> impl Iterator<Item = (WordId, WordId, &Trigram)> + '_ {
        let n_words = self.n_words() as WordId;
        (0..n_words).flat_map(move |w1| {
            self.bigram_range(w1).flat_map(move |bi| {
                let w2 = self.bigrams[bi].word;
                self.trigrams[self.trigram_range(bi)]
                    .iter()
                    .map(move |t| (w1, w2, t))
            })
        })
    }
}

fn check_order(order: u8) -> LmResult<()> {
    if order == 0 || order > MAX_ORDER {
        return Err(LmError::format(format!(
            "unsupported n-gram order {} (1..={})",
            order, MAX_ORDER
        )));
    }
    Ok(())
}

/// Validate one level of `next` offsets and the words of the blocks they
/// delimit: offsets must be non-decreasing and end exactly at `n_children`,
/// and each block must hold strictly increasing in-vocabulary word ids.
fn check_links<O, F, W>(
    level: &str,
    offsets: O,
    n_children: usize,
    block_words: F,
    n_words: usize,
) -> LmResult<()>
where
    O: Iterator<Item = u32>,
    F: Fn(Range<usize>) -> W,
    W: Iterator<Item = WordId>,
{
    let offsets: Vec<usize> = offsets.map(|o| o as usize).collect();
    if offsets.first().copied() != Some(0) || offsets.last().copied() != Some(n_children) {
        return Err(LmError::format(format!(
            "{} offsets do not span the next order ({} records)",
            level, n_children
        )));
    }
    for pair in offsets.windows(2) {
        if pair[0] > pair[1] {
            return Err(LmError::format(format!("{} offsets are not monotonic", level)));
        }
        let mut prev: Option<WordId> = None;
        for w in block_words(pair[0]..pair[1]) {
            if w as usize >= n_words || prev.is_some_and(|p| p >= w) {
                return Err(LmError::format(format!(
                    "{} successor block is unsorted or refers to word id {} outside the vocabulary",
                    level, w
                )));
            }
            prev = Some(w);
        }
    }
    Ok(())
}
