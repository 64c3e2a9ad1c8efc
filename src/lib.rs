#![forbid(unsafe_code)]
//! Rstfix rewrites pandoc-generated man-page RST into Sphinx-ready RST:
//! normalized headings, language-tagged code blocks, merged parameter and
//! bullet lists, a single `.. seealso::` directive, and `:ref:` cross
//! references resolved against a table of known targets.
//!
//! # Example
//!
//! ```
//! let refs = rstfix::RefTable::from_names(["mpi_send"]);
//! let rst = rstfix::transform("NAME\n====\n\nMPI_Send - send a message\n", "MPI_Send", &refs);
//! assert!(rst.starts_with(".. _mpi_send:"));
//! assert!(rst.contains(":ref:`MPI_Send`"));
//! ```

use log::warn;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt;
use std::fs;
use std::path::Path;

#[derive(Debug)]
pub enum RstfixError {
    MissingInput(String),
    MissingReferenceFile(String),
    Output(String),
    Version(String),
}

impl fmt::Display for RstfixError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RstfixError::MissingInput(msg) => write!(f, "cannot read input: {msg}"),
            RstfixError::MissingReferenceFile(msg) => {
                write!(f, "cannot read reference table: {msg}")
            }
            RstfixError::Output(msg) => write!(f, "cannot write output: {msg}"),
            RstfixError::Version(msg) => write!(f, "bad version descriptor: {msg}"),
        }
    }
}

impl Error for RstfixError {}

pub type Result<T> = std::result::Result<T, RstfixError>;

/// The set of identifiers that may legally be cross-reference targets.
///
/// Loaded once per run and read-only afterwards. Membership tests are
/// case-insensitive; the table stores lowercase names.
#[derive(Debug, Clone, Default)]
pub struct RefTable {
    names: HashSet<String>,
}

impl RefTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Reads one identifier per line; blank lines are ignored.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|err| {
            RstfixError::MissingReferenceFile(format!("{}: {err}", path.display()))
        })?;
        Ok(Self::from_names(
            text.lines().map(str::trim).filter(|line| !line.is_empty()),
        ))
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names
                .into_iter()
                .map(|name| name.into().to_lowercase())
                .collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&name.to_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

// Command-name tokens: MPI_/shmem_ prefix (case-insensitive), optionally
// wrapped in */` markup and optionally suffixed with a section number.
static XREF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[*`]*(?i:mpi|shmem)_[A-Za-z0-9_]+(?:\(\d\))?[`*]*").unwrap());

static SECTION_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(\d\)$").unwrap());

static BULLET: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*[-*] ").unwrap());

static FORTRAN_HINT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)fortran").unwrap());
static CPP_HINT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)c\+\+").unwrap());
static C_HINT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)c[^a-zA-Z]").unwrap());

/// A line of repeated heading-underline punctuation.
fn is_delimiter(line: &str) -> bool {
    let mut chars = line.chars();
    match chars.next() {
        Some(first @ ('=' | '-' | '~' | '^')) => chars.all(|ch| ch == first),
        _ => false,
    }
}

fn is_literal_marker(line: &str) -> bool {
    line.starts_with("::")
}

fn is_bullet(line: &str) -> bool {
    BULLET.is_match(line)
}

fn is_include_directive(line: &str) -> bool {
    line.starts_with(".. include::")
}

/// ALL-CAPS section names mark top-level headings.
fn is_upper_heading(line: &str) -> bool {
    line.chars().any(|ch| ch.is_ascii_uppercase())
        && !line.chars().any(|ch| ch.is_ascii_lowercase())
}

/// Picks the code-block language from a hint line. First match wins, in
/// fixed priority order; only languages the man pages actually use.
fn language_hint(line: &str) -> Option<&'static str> {
    if FORTRAN_HINT.is_match(line) {
        Some("fortran")
    } else if CPP_HINT.is_match(line) {
        Some("c++")
    } else if C_HINT.is_match(line) {
        Some("c")
    } else {
        None
    }
}

fn strip_markup(token: &str) -> String {
    let bare: String = token
        .chars()
        .filter(|ch| !matches!(ch, '*' | '`'))
        .collect();
    SECTION_SUFFIX.replace(&bare, "").into_owned()
}

/// Replaces every command-name token whose stripped, lowercased form is in
/// the table with `` :ref:`Token` `` (original case preserved). Tokens not
/// in the table lose their emphasis markup but stay plain text, so no
/// dangling references are fabricated. Never applied inside literal blocks.
pub fn substitute_xrefs(line: &str, refs: &RefTable) -> String {
    XREF.replace_all(line, |caps: &Captures| {
        let token = strip_markup(&caps[0]);
        if refs.contains(&token) {
            format!(":ref:`{token}`")
        } else {
            token
        }
    })
    .into_owned()
}

/// The input document: an immutable line sequence with bounded peeks.
struct Document {
    lines: Vec<String>,
}

impl Document {
    fn new(text: &str) -> Self {
        Self {
            lines: text.lines().map(|line| line.trim_end().to_string()).collect(),
        }
    }

    fn line(&self, i: usize) -> Option<&str> {
        self.lines.get(i).map(String::as_str)
    }

    fn len(&self) -> usize {
        self.lines.len()
    }
}

/// The structural region currently being processed. Exactly one zone is
/// active per line; carrying it as a single value rules out impossible
/// state combinations.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Zone {
    Prose,
    Literal {
        language: Option<&'static str>,
        include_run: bool,
    },
    ParameterList,
}

struct Engine<'a> {
    doc: &'a Document,
    refs: &'a RefTable,
    cmdname: &'a str,
    out: Vec<String>,
    zone: Zone,
    in_synopsis: bool,
    title_emitted: bool,
}

impl<'a> Engine<'a> {
    fn new(doc: &'a Document, cmdname: &'a str, refs: &'a RefTable) -> Self {
        Self {
            doc,
            refs,
            cmdname,
            out: Vec::new(),
            zone: Zone::Prose,
            in_synopsis: false,
            title_emitted: false,
        }
    }

    fn run(mut self) -> Vec<String> {
        // The reference label comes first in every document so that other
        // pages can link to this one.
        self.out.push(format!(".. _{}:", self.cmdname.to_lowercase()));
        self.out.push(String::new());

        let mut i = 0;
        while i < self.doc.len() {
            i = self.step(i);
        }
        if self.zone == Zone::ParameterList {
            warn!("{}: parameter section ran to end of document", self.cmdname);
        }
        self.out
    }

    /// Consumes the line at `i` (plus any lines a merge claims) and returns
    /// the next cursor position. Lookahead only ever peeks.
    fn step(&mut self, i: usize) -> usize {
        let doc = self.doc;
        let cur = doc.line(i).unwrap_or("");

        // A line starting with a letter ends a literal block. This is the
        // original tool's approximation: true literal termination is
        // indentation-based, but downstream pages rely on this behavior.
        if matches!(self.zone, Zone::Literal { .. })
            && cur.chars().next().is_some_and(|ch| ch.is_ascii_alphabetic())
        {
            self.zone = Zone::Prose;
        }

        let heading = !cur.is_empty()
            && !is_delimiter(cur)
            && doc.line(i + 1).is_some_and(is_delimiter);
        if heading {
            return self.enter_section(i, cur);
        }

        match self.zone {
            Zone::Literal { language, include_run } => {
                self.literal_line(i, cur, language, include_run)
            }
            Zone::ParameterList => self.parameter_entry(i, cur),
            Zone::Prose => self.prose_line(i, cur),
        }
    }

    /// Handles a heading line (the line after it is a delimiter). Consumes
    /// both lines.
    fn enter_section(&mut self, i: usize, cur: &str) -> usize {
        let upper = is_upper_heading(cur);
        if upper {
            self.in_synopsis = cur.starts_with("SYNOPSIS");
        }
        self.zone = Zone::Prose;

        if cur.eq_ignore_ascii_case("name") && !self.title_emitted {
            // The html index wants the page named after the command, and
            // the renderer expects a single-rooted heading hierarchy, so
            // only the first NAME heading is replaced.
            self.title_emitted = true;
            self.out.push(self.cmdname.to_string());
            self.out.push("=".repeat(self.cmdname.chars().count()));
            return i + 2;
        }

        if cur.eq_ignore_ascii_case("see also") {
            self.emit_seealso(i + 2);
            return self.doc.len();
        }

        if cur.contains("PARAMETER") {
            self.zone = Zone::ParameterList;
            self.push_heading(cur, '-');
            return i + 2;
        }

        if upper {
            self.push_heading(cur, '-');
        } else {
            self.push_heading(cur, '^');
        }
        i + 2
    }

    fn push_heading(&mut self, text: &str, underline: char) {
        self.out.push(String::new());
        self.out.push(text.to_string());
        self.out
            .push(underline.to_string().repeat(text.chars().count()));
    }

    /// Terminal: collects command tokens from every remaining line into one
    /// space-joined `.. seealso::` directive. Remaining input is discarded.
    fn emit_seealso(&mut self, start: usize) {
        let doc = self.doc;
        let mut items = Vec::new();
        for j in start..doc.len() {
            let line = doc.line(j).unwrap_or("");
            if line.is_empty() || is_delimiter(line) {
                continue;
            }
            for found in XREF.find_iter(line) {
                let token = strip_markup(found.as_str());
                if self.refs.contains(&token) {
                    items.push(format!(":ref:`{token}`"));
                } else {
                    warn!(
                        "{}: see-also target {token} is not in the reference table",
                        self.cmdname
                    );
                    items.push(token);
                }
            }
        }
        self.out.push(String::new());
        self.out.push(format!(".. seealso:: {}", items.join(" ")));
    }

    fn prose_line(&mut self, i: usize, cur: &str) -> usize {
        if cur.is_empty() {
            self.out.push(String::new());
            return i + 1;
        }
        if is_include_directive(cur) {
            // Include directives pass through verbatim.
            self.out.push(cur.to_string());
            return i + 1;
        }
        if is_literal_marker(cur) {
            return self.enter_literal(i, cur);
        }
        if is_bullet(cur) {
            let (merged, consumed) = self.merge_following(i, cur);
            self.out.push(substitute_xrefs(&merged, self.refs));
            return i + 1 + consumed;
        }
        self.out.push(substitute_xrefs(cur, self.refs));
        i + 1
    }

    /// A wrapped list item becomes one logical line: all immediately
    /// following non-blank lines are space-joined onto the bullet.
    fn merge_following(&self, i: usize, cur: &str) -> (String, usize) {
        let mut merged = cur.to_string();
        let mut consumed = 0;
        while let Some(next) = self.doc.line(i + 1 + consumed) {
            if next.is_empty() || is_bullet(next) || is_delimiter(next) {
                break;
            }
            merged.push(' ');
            merged.push_str(next.trim_start());
            consumed += 1;
        }
        (merged, consumed)
    }

    /// Handles a `::` marker. With a language hint on the nearest preceding
    /// substantive line the marker becomes a tagged code-block directive;
    /// otherwise it passes through, unless the block is degenerate (another
    /// delimiter within three lines) and the marker is dropped.
    fn enter_literal(&mut self, i: usize, cur: &str) -> usize {
        match self.language_hint_before(i) {
            Some(language) => {
                self.out.push(format!(".. code-block:: {language}"));
                self.out.push(String::new());
                self.zone = Zone::Literal {
                    language: Some(language),
                    include_run: false,
                };
                // The directive brings its own separator; swallow the
                // blank line that followed the marker.
                if self.doc.line(i + 1).is_some_and(str::is_empty) {
                    i + 2
                } else {
                    i + 1
                }
            }
            None => {
                let degenerate = self.doc.line(i + 3).is_some_and(is_delimiter);
                if !degenerate {
                    self.out.push(cur.to_string());
                }
                self.zone = Zone::Literal {
                    language: None,
                    include_run: false,
                };
                i + 1
            }
        }
    }

    /// Scans back past blank and delimiter lines to the nearest substantive
    /// line and reads the language hint from it alone.
    fn language_hint_before(&self, i: usize) -> Option<&'static str> {
        let mut j = i;
        while j > 0 {
            j -= 1;
            let line = self.doc.line(j)?;
            if line.is_empty() || is_delimiter(line) {
                continue;
            }
            return language_hint(line);
        }
        None
    }

    /// Literal passthrough. Tagged code blocks get two refinements: inside
    /// SYNOPSIS semicolons are stripped, and a run of `#include <...>`
    /// lines is separated from the code after it by one blank line.
    fn literal_line(
        &mut self,
        i: usize,
        cur: &str,
        language: Option<&'static str>,
        include_run: bool,
    ) -> usize {
        if language.is_none() {
            self.out.push(cur.to_string());
            return i + 1;
        }

        let mut line = cur.to_string();
        if self.in_synopsis {
            line = line.replace(';', "");
        }
        if line.contains("#include <") {
            self.zone = Zone::Literal {
                language,
                include_run: true,
            };
        } else if include_run {
            self.zone = Zone::Literal {
                language,
                include_run: false,
            };
            if !line.is_empty() {
                self.out.push(String::new());
            }
        }
        self.out.push(line);
        i + 1
    }

    /// One parameter entry: `term: description`, with a colonless first
    /// line taking its description from the next line, and further indented
    /// non-blank lines space-joined onto the description.
    fn parameter_entry(&mut self, i: usize, cur: &str) -> usize {
        if cur.is_empty() {
            return i + 1;
        }
        if is_delimiter(cur) {
            self.zone = Zone::Prose;
            return i + 1;
        }

        let mut consumed = 0;
        let trimmed = cur.trim_start();
        let (term, mut desc) = match trimmed.split_once(':') {
            Some((term, desc)) => (term.trim().to_string(), desc.trim().to_string()),
            None => {
                consumed += 1;
                let next = self.doc.line(i + 1).unwrap_or("").trim().to_string();
                (trimmed.to_string(), next)
            }
        };
        while let Some(next) = self.doc.line(i + 1 + consumed) {
            if next.is_empty() || !next.starts_with(char::is_whitespace) {
                break;
            }
            if !desc.is_empty() {
                desc.push(' ');
            }
            desc.push_str(next.trim_start());
            consumed += 1;
        }

        self.out.push(format!("* ``{term}``: {desc}"));
        self.out.push(String::new());
        i + 1 + consumed
    }
}

/// Transforms one document. Always succeeds: per-line anomalies degrade to
/// warnings and best-effort output.
pub fn transform(input: &str, cmdname: &str, refs: &RefTable) -> String {
    let doc = Document::new(input);
    let lines = Engine::new(&doc, cmdname, refs).run();
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// The command name a document describes: the file name up to the first
/// dot, so `MPI_Abort.3.md` names `MPI_Abort`.
pub fn command_name(path: &Path) -> String {
    let base = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    match base.split_once('.') {
        Some((stem, _)) => stem.to_string(),
        None => base,
    }
}

/// The build's version descriptor: `key=value` lines with `#` comments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub major: String,
    pub minor: String,
    pub release: String,
    pub greek: String,
}

impl VersionInfo {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|err| RstfixError::Version(format!("{}: {err}", path.display())))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut fields = HashMap::new();
        for line in text.lines() {
            let line = match line.split_once('#') {
                Some((data, _comment)) => data,
                None => line,
            };
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            fields.insert(key.trim().to_string(), value.trim().to_string());
        }
        let mut take = |key: &str| {
            fields
                .remove(key)
                .ok_or_else(|| RstfixError::Version(format!("missing key '{key}'")))
        };
        Ok(Self {
            major: take("major")?,
            minor: take("minor")?,
            release: take("release")?,
            greek: take("greek")?,
        })
    }

    /// The release series, e.g. `5.0.x`.
    pub fn series(&self) -> String {
        format!("{}.{}.x", self.major, self.minor)
    }

    /// The full version, e.g. `5.0.3rc1`.
    pub fn full(&self) -> String {
        format!("{}.{}.{}{}", self.major, self.minor, self.release, self.greek)
    }
}

/// Copies everything from the first case-insensitive "see also" line to the
/// end of a rendered man page, lines trimmed. Independent of the engine.
pub fn extract_seealso(text: &str) -> Option<String> {
    let mut found = false;
    let mut out = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if !found && line.to_lowercase().starts_with("see also") {
            found = true;
        }
        if found {
            out.push(line);
        }
    }
    found.then(|| out.join("\n"))
}
