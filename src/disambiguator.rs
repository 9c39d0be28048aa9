//! Rule-based disambiguation of tagged cohort streams.
//!
//! The input format is line-based: a line starting with `"<` opens a cohort
//! (the surface form), tab-indented lines are its candidate readings, and
//! every other line is passed through untouched. A grammar is a JSON list
//! of `select`/`remove` rules whose patterns are regular expressions over
//! whole reading lines, applied in grammar order to each cohort in
//! isolation. A cohort never loses its last reading.

use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;

use crate::memstream::{MemReader, OutputSink};

/// Engine runtime record, created and freed by the host.
///
/// Replaces a hidden process-wide context: every run call receives one of
/// these, so the wiring is visible in the interface. Runs against distinct
/// records are independent.
#[derive(Debug, Default)]
pub struct DisambiguatorRuntime {
    verbose: bool,
    runs: AtomicU64,
}

impl DisambiguatorRuntime {
    pub fn new(verbose: bool) -> Self {
        DisambiguatorRuntime {
            verbose,
            runs: AtomicU64::new(0),
        }
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Number of completed runs against this record.
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    fn note_run(&self) -> u64 {
        self.runs.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// What a rule does to the readings its pattern matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Select,
    Remove,
}

#[derive(Debug, Deserialize)]
struct RuleSpec {
    name: String,
    action: RuleAction,
    pattern: String,
}

#[derive(Debug, Deserialize)]
struct GrammarSpec {
    rules: Vec<RuleSpec>,
}

#[derive(Debug)]
struct Rule {
    name: String,
    action: RuleAction,
    pattern: Regex,
}

/// A parsed rule grammar. Loaded once per invocation, never cached.
#[derive(Debug)]
pub struct RuleGrammar {
    rules: Vec<Rule>,
}

impl RuleGrammar {
    /// Parse a grammar blob. Fails on malformed JSON (a zero-length blob
    /// included) and on any rule pattern that does not compile.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let spec: GrammarSpec =
            serde_json::from_slice(data).context("grammar blob did not parse")?;
        let mut rules = Vec::with_capacity(spec.rules.len());
        for rule in spec.rules {
            let pattern = Regex::new(&rule.pattern)
                .with_context(|| format!("rule {:?} has an invalid pattern", rule.name))?;
            rules.push(Rule {
                name: rule.name,
                action: rule.action,
                pattern,
            });
        }
        Ok(RuleGrammar { rules })
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

/// Applies a loaded grammar to a cohort stream.
pub struct RuleApplicator<'g> {
    grammar: &'g RuleGrammar,
    verbose: bool,
}

impl<'g> RuleApplicator<'g> {
    pub fn new(grammar: &'g RuleGrammar, runtime: &DisambiguatorRuntime) -> Self {
        RuleApplicator {
            grammar,
            verbose: runtime.verbose(),
        }
    }

    /// Run the grammar over `input` to completion, writing the
    /// disambiguated stream into `output`. Returns the number of cohorts
    /// seen.
    pub fn run<R: BufRead, W: Write>(&self, input: R, output: &mut W) -> Result<u64> {
        let mut cohorts = 0u64;
        let mut surface: Option<String> = None;
        let mut readings: Vec<String> = Vec::new();

        for line in input.lines() {
            let line = line.context("input stream is not valid UTF-8")?;
            if line.starts_with("\"<") {
                self.flush_cohort(&mut surface, &mut readings, &mut cohorts, output)?;
                surface = Some(line);
            } else if line.starts_with('\t') && surface.is_some() {
                readings.push(line);
            } else {
                self.flush_cohort(&mut surface, &mut readings, &mut cohorts, output)?;
                writeln!(output, "{}", line)?;
            }
        }
        self.flush_cohort(&mut surface, &mut readings, &mut cohorts, output)?;
        Ok(cohorts)
    }

    fn flush_cohort<W: Write>(
        &self,
        surface: &mut Option<String>,
        readings: &mut Vec<String>,
        cohorts: &mut u64,
        output: &mut W,
    ) -> Result<()> {
        let Some(surface_line) = surface.take() else {
            return Ok(());
        };
        *cohorts += 1;
        let kept = self.disambiguate(std::mem::take(readings));
        writeln!(output, "{}", surface_line)?;
        for reading in &kept {
            writeln!(output, "{}", reading)?;
        }
        Ok(())
    }

    /// Sequential rule application over one cohort's readings. `select`
    /// keeps matching readings when the cohort has both matching and
    /// non-matching ones; `remove` drops matching readings unless that
    /// would empty the cohort.
    fn disambiguate(&self, mut readings: Vec<String>) -> Vec<String> {
        for rule in &self.grammar.rules {
            if readings.len() < 2 {
                break;
            }
            let matching = readings
                .iter()
                .filter(|r| rule.pattern.is_match(r))
                .count();
            match rule.action {
                RuleAction::Select => {
                    if matching > 0 && matching < readings.len() {
                        readings.retain(|r| rule.pattern.is_match(r));
                        if self.verbose {
                            eprintln!(
                                "disambiguator: rule {:?} selected {} reading(s)",
                                rule.name,
                                readings.len()
                            );
                        }
                    }
                }
                RuleAction::Remove => {
                    if matching > 0 && matching < readings.len() {
                        readings.retain(|r| !rule.pattern.is_match(r));
                        if self.verbose {
                            eprintln!(
                                "disambiguator: rule {:?} removed {} reading(s)",
                                rule.name, matching
                            );
                        }
                    }
                }
            }
        }
        readings
    }
}

/// Load a grammar, run it over `input`, and return the completed sink.
///
/// This is the full run sequence behind `ffi::disambiguator_run`: parse the
/// grammar, bind an applicator, stream the input through it into a fresh
/// sink. The grammar and applicator are dropped on return; the sink is not.
pub fn run_buffer(
    runtime: &DisambiguatorRuntime,
    grammar: &[u8],
    input: &[u8],
) -> Result<OutputSink> {
    let grammar = RuleGrammar::from_bytes(grammar)?;
    let applicator = RuleApplicator::new(&grammar, runtime);
    let reader = MemReader::new(input);
    let mut sink = OutputSink::new();
    let cohorts = applicator.run(reader, &mut sink)?;
    let run = runtime.note_run();
    if runtime.verbose() {
        eprintln!(
            "disambiguator: run #{}: {} rule(s), {} cohort(s), {} byte(s) out",
            run,
            grammar.rule_count(),
            cohorts,
            sink.len()
        );
    }
    Ok(sink)
}

#[cfg(test)]
mod tests {
    use super::*;

    const INPUT: &str = "\"<Hello>\"\n\
        \t\"heallat\" V IV Ind Prs ConNeg <W:0.0>\n\
        \t\"heallat\" N Sg Nom <W:0.0>\n\
        : \n\
        \"<on>\"\n\
        \t\"on\" Adv <W:0.0>\n";

    fn grammar(json: &str) -> RuleGrammar {
        RuleGrammar::from_bytes(json.as_bytes()).unwrap()
    }

    fn apply(grammar_json: &str, input: &str) -> String {
        let runtime = DisambiguatorRuntime::new(false);
        let sink = run_buffer(&runtime, grammar_json.as_bytes(), input.as_bytes()).unwrap();
        String::from_utf8(sink.as_bytes().to_vec()).unwrap()
    }

    #[test]
    fn test_grammar_rejects_zero_length_blob() {
        assert!(RuleGrammar::from_bytes(&[]).is_err());
    }

    #[test]
    fn test_grammar_rejects_malformed_json() {
        assert!(RuleGrammar::from_bytes(b"not a grammar").is_err());
    }

    #[test]
    fn test_grammar_rejects_invalid_pattern() {
        let json = br#"{"rules":[{"name":"bad","action":"select","pattern":"("}]}"#;
        assert!(RuleGrammar::from_bytes(json).is_err());
    }

    #[test]
    fn test_grammar_counts_rules() {
        let g = grammar(
            r#"{"rules":[
                {"name":"a","action":"select","pattern":"X"},
                {"name":"b","action":"remove","pattern":"Y"}
            ]}"#,
        );
        assert_eq!(g.rule_count(), 2);
    }

    #[test]
    fn test_select_keeps_matching_readings() {
        let out = apply(
            r#"{"rules":[{"name":"select-verb","action":"select","pattern":"\\bV\\b"}]}"#,
            INPUT,
        );
        assert_eq!(
            out,
            "\"<Hello>\"\n\
             \t\"heallat\" V IV Ind Prs ConNeg <W:0.0>\n\
             : \n\
             \"<on>\"\n\
             \t\"on\" Adv <W:0.0>\n"
        );
    }

    #[test]
    fn test_select_without_match_is_noop() {
        let out = apply(
            r#"{"rules":[{"name":"select-adj","action":"select","pattern":"\\bAdj\\b"}]}"#,
            INPUT,
        );
        assert_eq!(out, INPUT);
    }

    #[test]
    fn test_remove_drops_matching_readings() {
        let out = apply(
            r#"{"rules":[{"name":"drop-noun","action":"remove","pattern":"\\bN\\b"}]}"#,
            INPUT,
        );
        assert!(out.contains("\t\"heallat\" V IV Ind Prs ConNeg <W:0.0>\n"));
        assert!(!out.contains("N Sg Nom"));
    }

    #[test]
    fn test_remove_never_empties_a_cohort() {
        // Both readings carry <W:0.0>; removing them all would empty the cohort
        let out = apply(
            r#"{"rules":[{"name":"drop-all","action":"remove","pattern":"<W:"}]}"#,
            INPUT,
        );
        assert_eq!(out, INPUT);
    }

    #[test]
    fn test_rules_apply_in_grammar_order() {
        let input = "\"<x>\"\n\t\"x\" A B\n\t\"x\" A C\n\t\"x\" D\n";
        // First narrow to the A readings, then drop the C one
        let out = apply(
            r#"{"rules":[
                {"name":"first","action":"select","pattern":"\\bA\\b"},
                {"name":"second","action":"remove","pattern":"\\bC\\b"}
            ]}"#,
            input,
        );
        assert_eq!(out, "\"<x>\"\n\t\"x\" A B\n");
    }

    #[test]
    fn test_non_cohort_lines_pass_through() {
        let input = "# comment\n: \n\"<w>\"\n\t\"w\" X\n";
        let out = apply(r#"{"rules":[]}"#, input);
        assert_eq!(out, input);
    }

    #[test]
    fn test_empty_input_yields_empty_sink() {
        let out = apply(r#"{"rules":[]}"#, "");
        assert!(out.is_empty());
    }

    #[test]
    fn test_runtime_counts_runs() {
        let runtime = DisambiguatorRuntime::new(false);
        run_buffer(&runtime, br#"{"rules":[]}"#, b"").unwrap();
        run_buffer(&runtime, br#"{"rules":[]}"#, b"").unwrap();
        assert_eq!(runtime.runs(), 2);
    }
}
