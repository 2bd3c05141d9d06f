// Shared fixture for the integration tests.
//
// Word ids follow unigram order with <UNK> first:
// <UNK>=0 </s>=1 <s>=2 absolute=3 david=4 huggins=5 daines=6
#![allow(dead_code)]

use std::sync::Arc;

use liblm_core::{LmConfig, LogMath, NGramModel};

pub const TRIGRAM_ARPA: &str = "\
This is a small hand-built model for tests.

\\data\\
ngram 1=7
ngram 2=5
ngram 3=3

\\1-grams:
-3.2721 <UNK> -0.3
-1.0 </s>
-99 <s> -0.5
-1.2 absolute -0.25
-1.5 david -0.2
-1.4 huggins -0.35
-1.6 daines -0.1

\\2-grams:
-0.6 <s> david -0.15
-0.4 david huggins -0.2
-0.3 huggins daines -0.05
-0.7 daines </s>
-0.9 absolute </s>

\\3-grams:
-0.2 <s> david huggins
-0.1 david huggins daines
-0.5 huggins daines </s>

\\end\\
";

pub const WORDS: [&str; 7] = ["<UNK>", "</s>", "<s>", "absolute", "david", "huggins", "daines"];

pub fn config() -> LmConfig {
    LmConfig::default()
}

pub fn lmath() -> Arc<LogMath> {
    config().log_math().expect("default log math")
}

pub fn arpa_model(lmath: Arc<LogMath>) -> NGramModel {
    NGramModel::from_arpa_reader(TRIGRAM_ARPA.as_bytes(), lmath, &config()).expect("fixture loads")
}

/// Every (word, history) combination up to the model order.
pub fn all_queries() -> Vec<(u32, Vec<u32>)> {
    let n = WORDS.len() as u32;
    let mut out = Vec::new();
    for w in 0..n {
        out.push((w, vec![]));
        for h0 in 0..n {
            out.push((w, vec![h0]));
            for h1 in 0..n {
                out.push((w, vec![h0, h1]));
            }
        }
    }
    out
}
