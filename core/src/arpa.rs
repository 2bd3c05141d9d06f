//! ARPA text format.
//!
//! ```text
//! \data\
//! ngram 1=3
//! ngram 2=1
//!
//! \1-grams:
//! -1.0  <s>   -0.3
//! -0.7  word  -0.2
//! -1.2  </s>
//!
//! \2-grams:
//! -0.1  <s> word
//!
//! \end\
//! ```
//!
//! Values are base-10 logarithms. The unigram section defines the
//! vocabulary; every word of a higher-order entry must appear there.
use std::io::{BufRead, Write};

use crate::error::{LmError, LmResult};
use crate::logmath::LogMath;
use crate::tables::{NgramTables, RawNgram, MAX_ORDER};
use crate::vocab::{VocabBuilder, Vocabulary, WordId, OOV_ID};

/// Most records reserved up front from a header count. Larger sections grow
/// as they are parsed.
const MAX_RESERVE: usize = 1 << 20;

/// Line source that tracks positions for error messages.
struct Lines<R> {
    inner: std::io::Lines<R>,
    line_no: usize,
}

impl<R: BufRead> Lines<R> {
    /// Next non-blank line, trimmed.
    fn next_content(&mut self) -> LmResult<Option<String>> {
        for line in self.inner.by_ref() {
            self.line_no += 1;
            let line = match line {
                Ok(line) => line,
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    return Err(LmError::format(format!("line {}: not valid UTF-8", self.line_no)));
                }
                Err(e) => return Err(e.into()),
            };
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return Ok(Some(trimmed.to_string()));
            }
        }
        Ok(None)
    }

    fn error(&self, msg: impl std::fmt::Display) -> LmError {
        LmError::format(format!("line {}: {}", self.line_no, msg))
    }
}

/// Parse an ARPA model.
///
/// Returns the vocabulary (id 0 is `oov`, whether or not the file lists it)
/// and the record tables. Nothing is returned unless the whole file is valid.
pub fn read<R: BufRead>(
    reader: R,
    lmath: &LogMath,
    oov: &str,
) -> LmResult<(Vocabulary, NgramTables)> {
    let mut lines = Lines {
        inner: reader.lines(),
        line_no: 0,
    };

    // preamble
    loop {
        match lines.next_content()? {
            Some(line) if line == "\\data\\" => break,
            Some(_) => continue,
            None => return Err(LmError::format("missing \\data\\ header")),
        }
    }

    let mut counts: Vec<usize> = Vec::new();
    let mut pending = loop {
        let line = lines
            .next_content()?
            .ok_or_else(|| lines.error("unexpected end of file in \\data\\ block"))?;
        if line.starts_with('\\') {
            break line;
        }
        let (n, count) = parse_count_line(&line).ok_or_else(|| lines.error("bad ngram count line"))?;
        if n <= counts.len() {
            return Err(lines.error(format!("duplicate count for order {}", n)));
        }
        if n != counts.len() + 1 {
            return Err(lines.error(format!("order {} declared before order {}", n, counts.len() + 1)));
        }
        counts.push(count);
    };
    if counts.is_empty() {
        return Err(lines.error("no ngram counts declared"));
    }
    if counts.len() > MAX_ORDER as usize {
        return Err(LmError::format(format!(
            "order {} models are not supported (max {})",
            counts.len(),
            MAX_ORDER
        )));
    }
    let order = counts.len();

    let mut vocab = VocabBuilder::new(oov);
    let reserve = |n: usize| counts[n].min(MAX_RESERVE);
    vocab.reserve(reserve(0));
    let mut unigrams: Vec<(i32, i32)> = Vec::with_capacity(reserve(0) + 1);
    unigrams.push((lmath.zero(), 0));
    let mut oov_listed = false;
    let mut bigrams: Vec<RawNgram> = Vec::new();
    let mut trigrams: Vec<RawNgram> = Vec::new();

    for n in 1..=order {
        if pending == "\\data\\" {
            return Err(lines.error("duplicate \\data\\ header"));
        }
        if pending != format!("\\{}-grams:", n) {
            return Err(lines.error(format!("expected \\{}-grams:, found {}", n, pending)));
        }
        match n {
            2 => bigrams.reserve_exact(reserve(1)),
            3 => trigrams.reserve_exact(reserve(2)),
            _ => {}
        }

        let mut parsed = 0usize;
        let mut clamped = 0usize;
        pending = loop {
            let line = lines
                .next_content()?
                .ok_or_else(|| lines.error(format!("unexpected end of file in {}-gram section", n)))?;
            if line.starts_with('\\') {
                break line;
            }
            let entry = parse_entry(&line, n, order).map_err(|msg| lines.error(msg))?;
            parsed += 1;
            let mut prob = lmath.log10_to_log(entry.log10_prob);
            if prob > 0 {
                clamped += 1;
                prob = 0;
            }
            let backoff = entry.log10_backoff.map_or(0, |b| lmath.log10_to_log(b));

            if n == 1 {
                let word = entry.words[0];
                if word == oov {
                    if oov_listed {
                        return Err(lines.error(format!("duplicate unigram {}", word)));
                    }
                    oov_listed = true;
                    unigrams[OOV_ID as usize] = (prob, backoff);
                } else {
                    if vocab.get(word).is_some() {
                        return Err(lines.error(format!("duplicate unigram {}", word)));
                    }
                    vocab.intern(word);
                    unigrams.push((prob, backoff));
                }
                continue;
            }

            let mut ids = [0 as WordId; 3];
            for (slot, word) in ids.iter_mut().zip(&entry.words) {
                *slot = vocab
                    .get(word)
                    .ok_or_else(|| lines.error(format!("{} is not in the unigram section", word)))?;
            }
            if n == 2 {
                bigrams.push(RawNgram::bigram(ids[0], ids[1], prob, backoff));
            } else {
                trigrams.push(RawNgram::trigram(ids[0], ids[1], ids[2], prob));
            }
        };

        if pending == "\\data\\" {
            return Err(lines.error("duplicate \\data\\ header"));
        }
        if parsed != counts[n - 1] {
            return Err(LmError::format(format!(
                "{}-gram section has {} entries, header declares {}",
                n,
                parsed,
                counts[n - 1]
            )));
        }
        if clamped > 0 {
            tracing::warn!(order = n, count = clamped, "positive log probabilities clamped to 0");
        }
    }

    if pending != "\\end\\" {
        return Err(lines.error(format!("expected \\end\\, found {}", pending)));
    }
    if !oov_listed {
        tracing::warn!(oov, "OOV token has no unigram; using probability zero");
    }

    let tables = NgramTables::build(order as u8, unigrams, bigrams, trigrams)?;
    let vocab = vocab.finish()?;
    let [n1, n2, n3] = tables.counts();
    tracing::info!(order, unigrams = n1, bigrams = n2, trigrams = n3, "loaded ARPA model");
    Ok((vocab, tables))
}

/// `ngram N=count`
fn parse_count_line(line: &str) -> Option<(usize, usize)> {
    let rest = line.strip_prefix("ngram")?.trim_start();
    let (n, count) = rest.split_once('=')?;
    let n: usize = n.trim().parse().ok()?;
    let count: usize = count.trim().parse().ok()?;
    if n == 0 {
        return None;
    }
    Some((n, count))
}

struct Entry<'a> {
    log10_prob: f64,
    words: Vec<&'a str>,
    log10_backoff: Option<f64>,
}

fn parse_entry(line: &str, n: usize, order: usize) -> Result<Entry<'_>, String> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let with_backoff = fields.len() == n + 2;
    if fields.len() != n + 1 && !(with_backoff && n < order) {
        return Err(format!(
            "{}-gram line has {} fields",
            n,
            fields.len()
        ));
    }
    let log10_prob = parse_log10(fields[0])?;
    let log10_backoff = if with_backoff {
        Some(parse_log10(fields[n + 1])?)
    } else {
        None
    };
    Ok(Entry {
        log10_prob,
        words: fields[1..=n].to_vec(),
        log10_backoff,
    })
}

fn parse_log10(field: &str) -> Result<f64, String> {
    match field.parse::<f64>() {
        Ok(v) if !v.is_nan() => Ok(v),
        _ => Err(format!("invalid number {:?}", field)),
    }
}

/// Write tables back out as ARPA text with four decimal places.
pub fn write<W: Write>(
    mut out: W,
    lmath: &LogMath,
    vocab: &Vocabulary,
    tables: &NgramTables,
) -> LmResult<()> {
    let order = tables.order() as usize;
    let counts = tables.counts();
    let word = |id: WordId| word_of(vocab, id);
    let log10 = |v: i32| lmath.log_to_log10(v);

    writeln!(out, "\\data\\")?;
    for (n, count) in counts.iter().enumerate().take(order) {
        writeln!(out, "ngram {}={}", n + 1, count)?;
    }

    writeln!(out, "\n\\1-grams:")?;
    for id in 0..counts[0] as WordId {
        let u = tables.unigram(id);
        if order > 1 {
            writeln!(out, "{:.4}\t{}\t{:.4}", log10(u.prob), word(id)?, log10(u.backoff))?;
        } else {
            writeln!(out, "{:.4}\t{}", log10(u.prob), word(id)?)?;
        }
    }

    if order > 1 {
        writeln!(out, "\n\\2-grams:")?;
        for (w1, b) in tables.iter_bigrams() {
            if order > 2 {
                writeln!(
                    out,
                    "{:.4}\t{} {}\t{:.4}",
                    log10(b.prob),
                    word(w1)?,
                    word(b.word)?,
                    log10(b.backoff)
                )?;
            } else {
                writeln!(out, "{:.4}\t{} {}", log10(b.prob), word(w1)?, word(b.word)?)?;
            }
        }
    }

    if order > 2 {
        writeln!(out, "\n\\3-grams:")?;
        for (w1, w2, t) in tables.iter_trigrams() {
            writeln!(
                out,
                "{:.4}\t{} {} {}",
                log10(t.prob),
                word(w1)?,
                word(w2)?,
                word(t.word)?
            )?;
        }
    }

    writeln!(out, "\n\\end\\")?;
    out.flush()?;
    Ok(())
}

fn word_of(vocab: &Vocabulary, id: WordId) -> LmResult<&str> {
    vocab
        .word(id)
        .ok_or_else(|| LmError::format(format!("word id {} has no string", id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL: &str = "\
some preamble text

\\data\\
ngram 1=3
ngram 2=2

\\1-grams:
-1.0 <s> -0.3
-0.5 a -0.2
-0.7 </s>

\\2-grams:
-0.1 <s> a
-0.2 a </s>

\\end\\
";

    fn lmath() -> LogMath {
        LogMath::new(1.0001, 0, true).unwrap()
    }

    fn load(text: &str) -> LmResult<(Vocabulary, NgramTables)> {
        read(text.as_bytes(), &lmath(), "<UNK>")
    }

    #[test]
    fn reads_a_small_bigram_model() {
        let (vocab, tables) = load(SMALL).unwrap();
        assert_eq!(vocab.len(), 4);
        assert_eq!(vocab.get("<UNK>"), Some(0));
        assert_eq!(vocab.get("<s>"), Some(1));
        assert_eq!(tables.counts(), [4, 2, 0]);
        assert_eq!(tables.unigram(0).prob, lmath().zero());
        assert_eq!(tables.unigram(2).prob, -11513);
        assert_eq!(tables.unigram(2).backoff, -4605);
        assert_eq!(tables.unigram(3).backoff, 0);
        let i = tables.find_bigram(1, 2).unwrap();
        assert_eq!(tables.bigram(i).prob, -2302);
    }

    #[test]
    fn positive_probabilities_are_clamped() {
        let text = SMALL.replace("-0.5 a -0.2", "0.5 a -0.2");
        let (_, tables) = load(&text).unwrap();
        assert_eq!(tables.unigram(2).prob, 0);
    }

    #[test]
    fn count_mismatch_is_rejected() {
        let text = SMALL.replace("ngram 2=2", "ngram 2=3");
        assert!(matches!(load(&text), Err(LmError::Format(_))));
    }

    #[test]
    fn structural_errors_are_format_errors() {
        let cases = [
            SMALL.replace("\\end\\", ""),
            SMALL.replace("ngram 2=2", "ngram 3=2"),
            SMALL.replace("ngram 2=2", "ngram 1=3\nngram 2=2"),
            SMALL.replace("-0.2 a </s>", "-0.2 a </s> -0.1"),
            SMALL.replace("-0.1 <s> a", "-0.1 <s> b"),
            SMALL.replace("-0.1 <s> a", "-0.2 a </s>"),
            SMALL.replace("-0.7 </s>", "x </s>"),
            SMALL.replace("\\2-grams:", "\\3-grams:"),
            SMALL.replace("\\data\\\n", ""),
            SMALL.replace("\\1-grams:", "\\data\\\n\\1-grams:"),
            SMALL.replace("-0.5 a -0.2", "-0.5 a -0.2\n\\data\\"),
            "\\data\\\nngram 1=1\nngram 2=0\nngram 3=0\nngram 4=0\n".to_string(),
        ];
        for (i, text) in cases.iter().enumerate() {
            assert!(
                matches!(load(text), Err(LmError::Format(_))),
                "case {} should fail",
                i
            );
        }
    }

    #[test]
    fn huge_declared_counts_fail_cleanly() {
        let cases = [
            SMALL.replace("ngram 1=3", "ngram 1=18446744073709551615"),
            SMALL.replace("ngram 2=2", "ngram 2=4611686018427387904"),
            SMALL.replace("ngram 1=3", "ngram 1=100000000000"),
        ];
        for text in &cases {
            assert!(matches!(load(text), Err(LmError::Format(_))));
        }
    }

    #[test]
    fn invalid_utf8_is_a_format_error() {
        let mut bytes = SMALL.as_bytes().to_vec();
        let at = SMALL.find("-0.5 a").unwrap() + 5;
        bytes[at] = 0xE9;
        match read(bytes.as_slice(), &lmath(), "<UNK>") {
            Err(LmError::Format(msg)) => assert!(msg.starts_with("line 9:"), "{}", msg),
            other => panic!("expected format error, got {:?}", other),
        }
    }

    #[test]
    fn writer_output_reads_back() {
        let lm = lmath();
        let (vocab, tables) = load(SMALL).unwrap();
        let mut out = Vec::new();
        write(&mut out, &lm, &vocab, &tables).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("\\data\\\nngram 1=4\nngram 2=2\n"));
        assert!(text.contains("-0.1000\t<s> a"));

        let (vocab2, tables2) = load(&text).unwrap();
        assert_eq!(vocab2.len(), vocab.len());
        for id in 1..vocab.len() as WordId {
            let d = tables.unigram(id).prob - tables2.unigram(id).prob;
            assert!(d.abs() <= 2, "id {} drifted by {}", id, d);
        }
    }
}
