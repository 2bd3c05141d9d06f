//! Binary (DMP) model format.
//!
//! A fixed 56-byte header followed by the vocabulary strings and the three
//! record arenas. Unigram values are stored verbatim; bigram and trigram
//! values are 16-bit indices into per-column value tables (see
//! [`Quantizer`]). Every multi-byte field uses the byte order announced by
//! the marker at offset 16, so files written on either endianness load
//! anywhere.
//!
//! This is not the Sphinx `.DMP` layout and carries its own magic, so a
//! Sphinx dump is rejected at the first 16 bytes.
//!
//! ```text
//! [0..16)   magic "LIBLM-NGRAM-BIN\0"
//! [16..20)  byte-order marker 0x0A0B0C0D
//! [20..24)  version (1)
//! [24..28)  order (1..=3)
//! [28..36)  log base (f64 bits)
//! [36..40)  log shift
//! [40..52)  record counts for orders 1, 2, 3
//! [52..56)  quantization bits
//! ```
use std::io::{self, Read, Write};

use crate::config::LmConfig;
use crate::error::{LmError, LmResult};
use crate::logmath::LogMath;
use crate::quant::{Quantizer, MAX_QUANT_BITS};
use crate::tables::{Bigram, NgramTables, Trigram, Unigram, MAX_ORDER};
use crate::vocab::Vocabulary;

pub const MAGIC: &[u8; 16] = b"LIBLM-NGRAM-BIN\0";
pub const VERSION: u32 = 1;
const BYTE_ORDER_MARKER: u32 = 0x0A0B_0C0D;

const UNIGRAM_SIZE: usize = 12;
const BIGRAM_SIZE: usize = 12;
const TRIGRAM_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

/// Settings for [`write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmpOptions {
    /// Index width of the value tables, 1..=16.
    pub quant_bits: u32,
    pub byte_order: ByteOrder,
}

impl Default for DmpOptions {
    fn default() -> Self {
        Self {
            quant_bits: MAX_QUANT_BITS,
            byte_order: ByteOrder::Little,
        }
    }
}

/// Writer settings taken from a configuration: its `quant_bits`, native
/// little-endian order.
impl From<&LmConfig> for DmpOptions {
    fn from(config: &LmConfig) -> Self {
        Self {
            quant_bits: config.quant_bits,
            ..Self::default()
        }
    }
}

/// Cursor over an in-memory file image.
struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
    order: ByteOrder,
}

impl<'a> ByteReader<'a> {
    fn take(&mut self, n: usize) -> io::Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("need {} bytes at offset {}, {} left", n, self.pos, self.remaining()),
            ));
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> io::Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Fail early if `count` records of `size` bytes cannot fit.
    fn ensure(&self, count: usize, size: usize) -> io::Result<()> {
        match count.checked_mul(size) {
            Some(total) if total <= self.remaining() => Ok(()),
            _ => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{} records of {} bytes exceed the remaining {} bytes", count, size, self.remaining()),
            )),
        }
    }

    fn u16(&mut self) -> io::Result<u16> {
        let b = self.array::<2>()?;
        Ok(match self.order {
            ByteOrder::Little => u16::from_le_bytes(b),
            ByteOrder::Big => u16::from_be_bytes(b),
        })
    }

    fn u32(&mut self) -> io::Result<u32> {
        let b = self.array::<4>()?;
        Ok(match self.order {
            ByteOrder::Little => u32::from_le_bytes(b),
            ByteOrder::Big => u32::from_be_bytes(b),
        })
    }

    fn i32(&mut self) -> io::Result<i32> {
        Ok(self.u32()? as i32)
    }

    fn u64(&mut self) -> io::Result<u64> {
        let b = self.array::<8>()?;
        Ok(match self.order {
            ByteOrder::Little => u64::from_le_bytes(b),
            ByteOrder::Big => u64::from_be_bytes(b),
        })
    }

    fn value_table(&mut self, bits: u32) -> LmResult<Quantizer> {
        let len = self.u32()? as usize;
        if len > 1 << bits {
            return Err(LmError::format(format!(
                "value table of {} entries exceeds {} bits",
                len, bits
            )));
        }
        self.ensure(len, 4)?;
        let mut centers = Vec::with_capacity(len);
        for _ in 0..len {
            centers.push(self.i32()?);
        }
        Quantizer::from_centers(centers)
    }
}

fn lookup(table: &Quantizer, idx: u16, what: &str) -> LmResult<i32> {
    table.decode(idx).ok_or_else(|| {
        LmError::format(format!(
            "{} index {} outside a table of {}",
            what,
            idx,
            table.len()
        ))
    })
}

/// Load a binary model. The file's log base and shift must match `lmath`.
pub fn read<R: Read>(
    mut reader: R,
    lmath: &LogMath,
    oov: &str,
) -> LmResult<(Vocabulary, NgramTables)> {
    let mut image = Vec::new();
    reader.read_to_end(&mut image)?;
    parse(&image, lmath, oov)
}

fn parse(image: &[u8], lmath: &LogMath, oov: &str) -> LmResult<(Vocabulary, NgramTables)> {
    let mut r = ByteReader {
        buf: image,
        pos: 0,
        order: ByteOrder::Little,
    };

    if r.take(MAGIC.len())? != MAGIC {
        return Err(LmError::format("not a DMP model (bad magic)"));
    }
    let marker = r.array::<4>()?;
    r.order = if u32::from_le_bytes(marker) == BYTE_ORDER_MARKER {
        ByteOrder::Little
    } else if u32::from_be_bytes(marker) == BYTE_ORDER_MARKER {
        ByteOrder::Big
    } else {
        return Err(LmError::format("invalid byte-order marker"));
    };

    let version = r.u32()?;
    if version != VERSION {
        return Err(LmError::format(format!("unsupported DMP version {}", version)));
    }
    let order = r.u32()?;
    if order == 0 || order > MAX_ORDER as u32 {
        return Err(LmError::format(format!("unsupported n-gram order {}", order)));
    }
    let base = f64::from_bits(r.u64()?);
    let shift = r.u32()?;
    if (base - lmath.base()).abs() > 1e-12 || shift != lmath.shift() {
        return Err(LmError::format(format!(
            "model was built for base {} shift {}, context has base {} shift {}",
            base,
            shift,
            lmath.base(),
            lmath.shift()
        )));
    }
    let counts = [r.u32()? as usize, r.u32()? as usize, r.u32()? as usize];
    if counts[0] == 0 || counts[1..].iter().enumerate().any(|(i, &c)| c > 0 && i + 2 > order as usize) {
        return Err(LmError::format(format!(
            "record counts {:?} do not fit order {}",
            counts, order
        )));
    }
    let bits = r.u32()?;
    if bits == 0 || bits > MAX_QUANT_BITS {
        return Err(LmError::format(format!("unsupported quantization width {}", bits)));
    }

    // vocabulary
    let strings_len = r.u64()?;
    let strings_len = usize::try_from(strings_len)
        .map_err(|_| LmError::format("string table length overflows"))?;
    let strings = r.take(strings_len)?;
    let words = split_words(strings)?;
    if words.len() != counts[0] {
        return Err(LmError::format(format!(
            "string table holds {} words, header declares {}",
            words.len(),
            counts[0]
        )));
    }
    if words[0] != oov {
        return Err(LmError::format(format!(
            "word 0 is {:?}, expected the OOV token {:?}",
            words[0], oov
        )));
    }
    let vocab = Vocabulary::from_words(words)?;

    r.ensure(counts[0] + 1, UNIGRAM_SIZE)?;
    let mut unigrams = Vec::with_capacity(counts[0] + 1);
    for _ in 0..=counts[0] {
        unigrams.push(Unigram {
            prob: r.i32()?,
            backoff: r.i32()?,
            next: r.u32()?,
        });
    }

    let mut bigrams = Vec::new();
    if order >= 2 {
        let prob2 = r.value_table(bits)?;
        let bo2 = r.value_table(bits)?;
        r.ensure(counts[1] + 1, BIGRAM_SIZE)?;
        bigrams.reserve_exact(counts[1] + 1);
        for i in 0..=counts[1] {
            let word = r.u32()?;
            let prob_idx = r.u16()?;
            let bo_idx = r.u16()?;
            let next = r.u32()?;
            if i == counts[1] {
                bigrams.push(Bigram {
                    next,
                    ..Bigram::default()
                });
            } else {
                bigrams.push(Bigram {
                    word,
                    prob: lookup(&prob2, prob_idx, "bigram probability")?,
                    backoff: lookup(&bo2, bo_idx, "bigram backoff")?,
                    next,
                });
            }
        }
    }

    let mut trigrams = Vec::new();
    if order >= 3 {
        let prob3 = r.value_table(bits)?;
        r.ensure(counts[2], TRIGRAM_SIZE)?;
        trigrams.reserve_exact(counts[2]);
        for _ in 0..counts[2] {
            let word = r.u32()?;
            let prob_idx = r.u16()?;
            let _pad = r.u16()?;
            trigrams.push(Trigram {
                word,
                prob: lookup(&prob3, prob_idx, "trigram probability")?,
            });
        }
    }

    if r.remaining() > 0 {
        return Err(LmError::format(format!(
            "{} trailing bytes after the last record",
            r.remaining()
        )));
    }

    let tables = NgramTables::from_parts(order as u8, unigrams, bigrams, trigrams)?;
    tracing::info!(
        order,
        unigrams = counts[0],
        bigrams = counts[1],
        trigrams = counts[2],
        byte_order = ?r.order,
        "loaded DMP model"
    );
    Ok((vocab, tables))
}

fn split_words(strings: &[u8]) -> LmResult<Vec<String>> {
    let Some((&0, body)) = strings.split_last() else {
        return Err(LmError::format("string table is not NUL-terminated"));
    };
    body.split(|&b| b == 0)
        .map(|w| {
            String::from_utf8(w.to_vec())
                .map_err(|_| LmError::format("word is not valid UTF-8"))
        })
        .collect()
}

struct ByteWriter<W> {
    inner: W,
    order: ByteOrder,
}

impl<W: Write> ByteWriter<W> {
    fn bytes(&mut self, b: &[u8]) -> io::Result<()> {
        self.inner.write_all(b)
    }

    fn u16(&mut self, v: u16) -> io::Result<()> {
        match self.order {
            ByteOrder::Little => self.bytes(&v.to_le_bytes()),
            ByteOrder::Big => self.bytes(&v.to_be_bytes()),
        }
    }

    fn u32(&mut self, v: u32) -> io::Result<()> {
        match self.order {
            ByteOrder::Little => self.bytes(&v.to_le_bytes()),
            ByteOrder::Big => self.bytes(&v.to_be_bytes()),
        }
    }

    fn i32(&mut self, v: i32) -> io::Result<()> {
        self.u32(v as u32)
    }

    fn u64(&mut self, v: u64) -> io::Result<()> {
        match self.order {
            ByteOrder::Little => self.bytes(&v.to_le_bytes()),
            ByteOrder::Big => self.bytes(&v.to_be_bytes()),
        }
    }

    fn value_table(&mut self, table: &Quantizer) -> io::Result<()> {
        self.u32(table.len() as u32)?;
        for &c in table.centers() {
            self.i32(c)?;
        }
        Ok(())
    }
}

/// Serialize tables in the binary format, quantizing bigram and trigram
/// values to `opts.quant_bits`.
pub fn write<W: Write>(
    out: W,
    lmath: &LogMath,
    vocab: &Vocabulary,
    tables: &NgramTables,
    opts: &DmpOptions,
) -> LmResult<()> {
    let bits = opts.quant_bits;
    if bits == 0 || bits > MAX_QUANT_BITS {
        return Err(LmError::config(format!(
            "quantization bits must be in 1..={}, got {}",
            MAX_QUANT_BITS, bits
        )));
    }
    let order = tables.order();
    let counts = tables.counts();
    if vocab.len() != counts[0] {
        return Err(LmError::format(format!(
            "vocabulary has {} words, tables have {} unigrams",
            vocab.len(),
            counts[0]
        )));
    }
    let mut w = ByteWriter {
        inner: out,
        order: opts.byte_order,
    };

    w.bytes(MAGIC)?;
    w.u32(BYTE_ORDER_MARKER)?;
    w.u32(VERSION)?;
    w.u32(order as u32)?;
    w.u64(lmath.base().to_bits())?;
    w.u32(lmath.shift())?;
    for c in counts {
        w.u32(c as u32)?;
    }
    w.u32(bits)?;

    let strings_len: usize = vocab.iter().map(|s| s.len() + 1).sum();
    w.u64(strings_len as u64)?;
    for word in vocab.iter() {
        w.bytes(word.as_bytes())?;
        w.bytes(&[0])?;
    }

    for u in tables.unigrams() {
        w.i32(u.prob)?;
        w.i32(u.backoff)?;
        w.u32(u.next)?;
    }

    if order >= 2 {
        let real = &tables.bigrams()[..counts[1]];
        let probs: Vec<i32> = real.iter().map(|b| b.prob).collect();
        let backoffs: Vec<i32> = real.iter().map(|b| b.backoff).collect();
        let prob2 = Quantizer::train(&probs, bits)?;
        let bo2 = Quantizer::train(&backoffs, bits)?;
        tracing::debug!(
            entries = prob2.len(),
            max_error = prob2.max_error(&probs),
            "quantized bigram probabilities"
        );
        tracing::debug!(
            entries = bo2.len(),
            max_error = bo2.max_error(&backoffs),
            "quantized bigram backoffs"
        );
        w.value_table(&prob2)?;
        w.value_table(&bo2)?;
        for (i, b) in tables.bigrams().iter().enumerate() {
            let (prob_idx, bo_idx) = if i < counts[1] {
                (prob2.encode(b.prob), bo2.encode(b.backoff))
            } else {
                (0, 0)
            };
            w.u32(b.word)?;
            w.u16(prob_idx)?;
            w.u16(bo_idx)?;
            w.u32(b.next)?;
        }
    }

    if order >= 3 {
        let probs: Vec<i32> = tables.trigrams().iter().map(|t| t.prob).collect();
        let prob3 = Quantizer::train(&probs, bits)?;
        tracing::debug!(
            entries = prob3.len(),
            max_error = prob3.max_error(&probs),
            "quantized trigram probabilities"
        );
        w.value_table(&prob3)?;
        for t in tables.trigrams() {
            w.u32(t.word)?;
            w.u16(prob3.encode(t.prob))?;
            w.u16(0)?;
        }
    }

    w.inner.flush()?;
    Ok(())
}

/// Whether `head` starts with the binary model magic.
pub fn is_dmp(head: &[u8]) -> bool {
    head.starts_with(MAGIC)
}
