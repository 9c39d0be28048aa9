//! Pattern tokenization backed by the `tokenizers` crate.
//!
//! The engine is constructed per invocation from a serialized tokenizer
//! definition and driven line by line over the input stream. The settings
//! record controls the emitted record format; the tokenization itself is
//! entirely the wrapped engine's.

use std::io::{BufRead, Read, Write};

use anyhow::{anyhow, Context, Result};
use tokenizers::Tokenizer;

use crate::memstream::{MemReader, OutputSink};

pub const OUTPUT_FORMAT_PLAIN: i32 = 0;
pub const OUTPUT_FORMAT_TSV: i32 = 1;
pub const OUTPUT_FORMAT_COHORT: i32 = 2;

/// Caller-owned tokenization settings, passed by reference over the FFI
/// boundary and never mutated.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TokenizeSettings {
    /// Record format: 0 = plain, 1 = tsv, 2 = cohort. Unknown values fall
    /// back to plain.
    pub output_format: i32,
    /// Forwarded to the engine's encode call.
    pub add_special_tokens: bool,
    /// Emit the token id of each segment (tsv and cohort formats).
    pub emit_ids: bool,
    /// Emit the byte offsets of each segment (tsv and cohort formats).
    pub emit_offsets: bool,
    /// Collapse a token identical to its immediate predecessor on a line.
    pub dedupe: bool,
    /// Hard cap on emitted tokens for the whole run; <= 0 means unlimited.
    pub max_tokens: i64,
    pub verbose: bool,
}

impl Default for TokenizeSettings {
    fn default() -> Self {
        TokenizeSettings {
            output_format: OUTPUT_FORMAT_PLAIN,
            add_special_tokens: false,
            emit_ids: false,
            emit_offsets: false,
            dedupe: false,
            max_tokens: 0,
            verbose: false,
        }
    }
}

/// The wrapped tokenizer engine, built fresh from a definition blob for
/// every invocation.
pub struct PatternTokenizer {
    inner: Tokenizer,
}

impl PatternTokenizer {
    /// Construct the engine from a definition stream. Reads the stream to
    /// its end and hands the bytes to the engine; a malformed definition
    /// fails with the engine's own error.
    pub fn from_reader<R: Read>(mut definition: R) -> Result<Self> {
        let mut bytes = Vec::new();
        definition
            .read_to_end(&mut bytes)
            .context("could not read tokenizer definition")?;
        if bytes.is_empty() {
            return Err(anyhow!("tokenizer definition is empty"));
        }
        let inner = Tokenizer::from_bytes(&bytes)
            .map_err(|e| anyhow!("tokenizer definition did not parse: {}", e))?;
        Ok(PatternTokenizer { inner })
    }

    /// Tokenize `input` line by line to completion, writing one record per
    /// token into `output`. Returns the number of emitted tokens.
    pub fn process<R: BufRead, W: Write>(
        &self,
        input: R,
        output: &mut W,
        settings: &TokenizeSettings,
    ) -> Result<u64> {
        let mut emitted = 0u64;
        'lines: for line in input.lines() {
            let line = line.context("input stream is not valid UTF-8")?;
            if line.is_empty() {
                continue;
            }
            let encoding = self
                .inner
                .encode(line.as_str(), settings.add_special_tokens)
                .map_err(|e| anyhow!("tokenization failed: {}", e))?;
            let tokens = encoding.get_tokens();
            let ids = encoding.get_ids();
            let offsets = encoding.get_offsets();

            let mut previous: Option<&str> = None;
            for (i, token) in tokens.iter().enumerate() {
                if settings.dedupe && previous == Some(token.as_str()) {
                    continue;
                }
                previous = Some(token.as_str());
                if settings.max_tokens > 0 && emitted >= settings.max_tokens as u64 {
                    if settings.verbose {
                        eprintln!("tokenizer: token cap {} reached", settings.max_tokens);
                    }
                    break 'lines;
                }
                write_record(output, settings, token, ids[i], offsets[i])?;
                emitted += 1;
            }
            if settings.output_format == OUTPUT_FORMAT_PLAIN {
                writeln!(output)?;
            }
        }
        if settings.verbose {
            eprintln!("tokenizer: {} token(s) emitted", emitted);
        }
        Ok(emitted)
    }
}

fn write_record<W: Write>(
    output: &mut W,
    settings: &TokenizeSettings,
    token: &str,
    id: u32,
    offsets: (usize, usize),
) -> Result<()> {
    match settings.output_format {
        OUTPUT_FORMAT_TSV => {
            write!(output, "{}", token)?;
            if settings.emit_ids {
                write!(output, "\t{}", id)?;
            }
            if settings.emit_offsets {
                write!(output, "\t{}\t{}", offsets.0, offsets.1)?;
            }
            writeln!(output)?;
        }
        OUTPUT_FORMAT_COHORT => {
            writeln!(output, "\"<{}>\"", token)?;
            write!(output, "\t\"{}\" TOK", token)?;
            if settings.emit_ids {
                write!(output, " ID:{}", id)?;
            }
            if settings.emit_offsets {
                write!(output, " <O:{},{}>", offsets.0, offsets.1)?;
            }
            writeln!(output)?;
        }
        _ => {
            writeln!(output, "{}", token)?;
        }
    }
    Ok(())
}

/// Construct the engine from `definition`, tokenize `input`, and return the
/// completed sink.
///
/// This is the full run sequence behind `ffi::tokenizer_run`: build the
/// engine from the definition stream, stream the input through it into a
/// fresh sink. The engine is dropped on return; the sink is not.
pub fn run_buffer(
    settings: &TokenizeSettings,
    definition: &[u8],
    input: &[u8],
) -> Result<OutputSink> {
    let engine = PatternTokenizer::from_reader(MemReader::new(definition))?;
    let reader = MemReader::new(input);
    let mut sink = OutputSink::new();
    engine.process(reader, &mut sink, settings)?;
    Ok(sink)
}

/// Word-level definition recognizing a handful of tokens; anything else
/// maps to `[UNK]`. Shared by this module's tests and the FFI tests.
#[cfg(test)]
pub(crate) const WORDLEVEL_DEF: &str = r#"{
  "version": "1.0",
  "truncation": null,
  "padding": null,
  "added_tokens": [],
  "normalizer": null,
  "pre_tokenizer": { "type": "Whitespace" },
  "post_processor": null,
  "decoder": null,
  "model": {
    "type": "WordLevel",
    "vocab": { "hello": 0, "world": 1, "again": 2, ".": 3, "[UNK]": 4 },
    "unk_token": "[UNK]"
  }
}"#;
