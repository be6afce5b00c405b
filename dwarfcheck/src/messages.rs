//! Diagnostic coordinates, message categories and the emission sink.
//!
//! Every diagnostic the checker produces carries a [`Where`]: the section it
//! talks about plus up to three nested numeric keys (CU, DIE, attribute; or
//! table, entry, ...). A message also carries a [`Category`] bitset, and the
//! two configured [`Criterion`] formulas decide whether the message is
//! suppressed, printed as a warning, or escalated to an error.
//!
//! The criteria are plain disjunctive normal form over the category bits: a
//! term is a pair of positive/negative masks, and a criterion accepts a
//! category iff some term does. The boolean operators on criteria are only
//! exercised while the command line is folded into configuration; during
//! checking the criteria are read-only.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;

use bitflags::bitflags;

use crate::readctx::ReadCtx;

/// Identifier of a section the checker knows about, including the synthetic
/// coordinates used for relocation and location-expression diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SectionId {
    Info,
    Abbrev,
    Aranges,
    Pubnames,
    Pubtypes,
    Str,
    Line,
    Loc,
    Mac,
    Ranges,
    LocExpr,
    Rel,
    Rela,
}

impl SectionId {
    /// All real debug sections, in the order they are registered during the
    /// ELF scan.
    pub const DEBUG_SECTIONS: &'static [SectionId] = &[
        SectionId::Info,
        SectionId::Abbrev,
        SectionId::Aranges,
        SectionId::Pubnames,
        SectionId::Pubtypes,
        SectionId::Str,
        SectionId::Line,
        SectionId::Loc,
        SectionId::Mac,
        SectionId::Ranges,
    ];

    /// The section name as it appears in the ELF section header table.
    pub fn name(self) -> &'static str {
        match self {
            SectionId::Info => ".debug_info",
            SectionId::Abbrev => ".debug_abbrev",
            SectionId::Aranges => ".debug_aranges",
            SectionId::Pubnames => ".debug_pubnames",
            SectionId::Pubtypes => ".debug_pubtypes",
            SectionId::Str => ".debug_str",
            SectionId::Line => ".debug_line",
            SectionId::Loc => ".debug_loc",
            SectionId::Mac => ".debug_mac",
            SectionId::Ranges => ".debug_ranges",
            SectionId::LocExpr => "location expression",
            SectionId::Rel => ".rel",
            SectionId::Rela => ".rela",
        }
    }

    /// Looks up a known debug section by its ELF name.
    pub fn from_name(name: &str) -> Option<SectionId> {
        Self::DEBUG_SECTIONS
            .iter()
            .copied()
            .find(|id| id.name() == name)
    }

    // Per-level coordinate labels; a `true` format flag means hexadecimal.
    fn labels(self) -> [Option<(&'static str, bool)>; 3] {
        match self {
            SectionId::Info => [Some(("CU", false)), Some(("DIE", true)), None],
            SectionId::Abbrev => [
                Some(("section", false)),
                Some(("abbreviation", false)),
                Some(("abbr. attribute", true)),
            ],
            SectionId::Aranges => [Some(("table", false)), Some(("arange", true)), None],
            SectionId::Pubnames => [Some(("pubname table", false)), Some(("pubname", true)), None],
            SectionId::Pubtypes => [Some(("pubtype table", false)), Some(("pubtype", true)), None],
            SectionId::Str => [Some(("offset", true)), None, None],
            SectionId::Line => [Some(("table", false)), Some(("offset", true)), None],
            SectionId::Loc => [Some(("loclist", true)), Some(("offset", true)), None],
            SectionId::Mac => [None, None, None],
            SectionId::Ranges => [Some(("rangelist", true)), Some(("offset", true)), None],
            SectionId::LocExpr => [Some(("offset", true)), None, None],
            SectionId::Rel | SectionId::Rela => {
                [Some(("relocation", false)), Some(("offset", true)), None]
            }
        }
    }
}

/// Special phrasing selectors for [`Where`] formatting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WhereFormat {
    #[default]
    Plain,
    /// Format `.debug_info: CU DIE <n>` instead of the usual CU/DIE pair.
    CuDie,
}

/// A structured diagnostic coordinate.
///
/// The three numeric keys nest: `addr2` can only be set while `addr1` is,
/// and `addr3` requires `addr2`; the `reset_*` methods maintain this.
/// `context` is printed parenthesized after the coordinate, `caused_by`
/// chains referring sites that are printed as separate lines under `--ref`.
#[derive(Clone, Debug)]
pub struct Where {
    section: SectionId,
    formatting: WhereFormat,
    addr1: Option<u64>,
    addr2: Option<u64>,
    addr3: Option<u64>,
    context: Option<Box<Where>>,
    caused_by: Option<Box<Where>>,
}

impl Where {
    /// A coordinate naming only a section.
    pub fn new(section: SectionId) -> Self {
        Where {
            section,
            formatting: WhereFormat::Plain,
            addr1: None,
            addr2: None,
            addr3: None,
            context: None,
            caused_by: None,
        }
    }

    /// A coordinate whose diagnostics were caused by `parent`.
    pub fn new_caused_by(section: SectionId, parent: &Where) -> Self {
        let mut wh = Where::new(section);
        wh.caused_by = Some(Box::new(parent.clone()));
        wh
    }

    pub fn section(&self) -> SectionId {
        self.section
    }

    pub fn set_format(&mut self, formatting: WhereFormat) {
        self.formatting = formatting;
    }

    /// Sets the first key and clears the deeper ones.
    pub fn reset_1(&mut self, addr: u64) {
        self.addr1 = Some(addr);
        self.addr2 = None;
        self.addr3 = None;
    }

    /// Sets the second key and clears the third.
    pub fn reset_2(&mut self, addr: u64) {
        debug_assert!(self.addr1.is_some());
        self.addr2 = Some(addr);
        self.addr3 = None;
    }

    /// Sets the third key.
    pub fn reset_3(&mut self, addr: u64) {
        debug_assert!(self.addr2.is_some());
        self.addr3 = Some(addr);
    }

    /// Attaches (or clears) the parenthesized context coordinate.
    pub fn set_context(&mut self, context: Option<&Where>) {
        self.context = context.map(|wh| Box::new(wh.clone()));
    }

    pub fn set_caused_by(&mut self, parent: &Where) {
        self.caused_by = Some(Box::new(parent.clone()));
    }

    fn caused_by_chain(&self) -> impl Iterator<Item = &Where> {
        std::iter::successors(self.caused_by.as_deref(), |wh| wh.caused_by.as_deref())
    }
}

impl fmt::Display for Where {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let is_reloc = matches!(self.section, SectionId::Rel | SectionId::Rela);

        match self.formatting {
            WhereFormat::CuDie => {
                write!(f, "{}", SectionId::Info.name())?;
                if let Some(addr) = self.addr1 {
                    write!(f, ": CU DIE {addr}")?;
                }
                return Ok(());
            }
            WhereFormat::Plain => write!(f, "{}", self.section.name())?,
        }

        if is_reloc {
            // A relocation coordinate names the section it relocates, e.g.
            // `.rel.debug_info`. The context of a location-expression site is
            // the expression's own coordinate; follow its chain to the real
            // section.
            let mut target = self.context.as_deref();
            if let Some(wh) = target {
                if wh.section == SectionId::LocExpr {
                    target = wh.caused_by.as_deref();
                }
            }
            if let Some(wh) = target {
                write!(f, "{}", wh.section.name())?;
            }
        }

        let labels = self.section.labels();
        for (addr, label) in [self.addr1, self.addr2, self.addr3].iter().zip(labels) {
            let (addr, (label, hex)) = match (addr, label) {
                (Some(addr), Some(label)) => (addr, label),
                _ => break,
            };
            if hex {
                write!(f, ": {label} {addr:#x}")?;
            } else {
                write!(f, ": {label} {addr}")?;
            }
        }

        if !is_reloc {
            if let Some(context) = &self.context {
                write!(f, " ({context})")?;
            }
        }

        Ok(())
    }
}

bitflags! {
    /// The message-category vocabulary.
    ///
    /// A diagnostic carries the union of an impact level, an accuracy tag
    /// and the source sections it concerns. `ERROR` marks messages that must
    /// be escalated regardless of impact.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Category: u32 {
        /// Local looks, readability of output.
        const IMPACT_1 = 1 << 0;
        /// Interpretation of data in the file in question.
        const IMPACT_2 = 1 << 1;
        /// Interpretation of this file's data in other files.
        const IMPACT_3 = 1 << 2;
        /// Message consumers choke on the construct.
        const IMPACT_4 = 1 << 3;

        /// Unnecessary bloat of the wire form.
        const ACC_BLOAT = 1 << 4;
        /// Suboptimal but legal construct.
        const ACC_SUBOPTIMAL = 1 << 5;

        const ARANGES = 1 << 6;
        const ELF = 1 << 7;
        const DIE_REL = 1 << 8;
        const DIE_OTHER = 1 << 9;
        const INFO = 1 << 10;
        const STRINGS = 1 << 11;
        const LOC = 1 << 12;
        const RANGES = 1 << 13;
        const LINE = 1 << 14;
        const PUBTABLES = 1 << 15;
        const PUBTYPES = 1 << 16;
        const RELOC = 1 << 17;
        const HEADER = 1 << 18;
        const ABBREVS = 1 << 19;
        const LEB128 = 1 << 20;

        /// Carries error severity independently of impact.
        const ERROR = 1 << 21;
    }
}

impl Category {
    /// No category bits at all.
    pub const OTHER: Category = Category::empty();

    const NAMES: &'static [(Category, &'static str)] = &[
        (Category::IMPACT_1, "impact_1"),
        (Category::IMPACT_2, "impact_2"),
        (Category::IMPACT_3, "impact_3"),
        (Category::IMPACT_4, "impact_4"),
        (Category::ACC_BLOAT, "acc_bloat"),
        (Category::ACC_SUBOPTIMAL, "acc_suboptimal"),
        (Category::ARANGES, "aranges"),
        (Category::ELF, "elf"),
        (Category::DIE_REL, "die_rel"),
        (Category::DIE_OTHER, "die_other"),
        (Category::INFO, "info"),
        (Category::STRINGS, "strings"),
        (Category::LOC, "loc"),
        (Category::RANGES, "ranges"),
        (Category::LINE, "line"),
        (Category::PUBTABLES, "pubtables"),
        (Category::PUBTYPES, "pubtypes"),
        (Category::RELOC, "reloc"),
        (Category::HEADER, "header"),
        (Category::ABBREVS, "abbrevs"),
        (Category::LEB128, "leb128"),
        (Category::ERROR, "error"),
    ];

    fn single_name(self) -> Option<&'static str> {
        Self::NAMES
            .iter()
            .find(|(cat, _)| *cat == self)
            .map(|(_, name)| *name)
    }

    fn from_single_name(name: &str) -> Option<Category> {
        Self::NAMES
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(cat, _)| *cat)
    }
}

/// One conjunctive term of a criterion: `positive₁ & … & ~negative₁ & …`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Term {
    pub positive: Category,
    pub negative: Category,
}

impl Term {
    pub fn new(positive: Category, negative: Category) -> Self {
        debug_assert!((positive & negative).is_empty());
        Term { positive, negative }
    }

    /// The term that accepts everything.
    pub fn any() -> Self {
        Term::new(Category::empty(), Category::empty())
    }

    fn accepts(&self, cat: Category) -> bool {
        cat.contains(self.positive) && (self.negative & cat).is_empty()
    }

    fn contradictory(&self) -> bool {
        !(self.positive & self.negative).is_empty()
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        let mut got = false;
        for &(cat, name) in Category::NAMES {
            if self.positive.contains(cat) || self.negative.contains(cat) {
                if got {
                    write!(f, " & ")?;
                }
                if self.negative.contains(cat) {
                    write!(f, "~")?;
                }
                write!(f, "{name}")?;
                got = true;
            }
        }
        if !got {
            write!(f, "1")?;
        }
        write!(f, ")")
    }
}

/// A disjunction of terms: accepts a category iff some term does.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Criterion {
    terms: Vec<Term>,
}

impl Criterion {
    /// The empty disjunction, which rejects everything.
    pub fn rejecting() -> Self {
        Criterion { terms: Vec::new() }
    }

    pub fn accepts(&self, cat: Category) -> bool {
        self.terms.iter().any(|t| t.accepts(cat))
    }

    /// Conjoins `term` onto every disjunct, dropping disjuncts that become
    /// internally contradictory.
    pub fn and(&mut self, term: Term) {
        debug_assert!(!term.contradictory());
        self.terms = self
            .terms
            .iter()
            .map(|t| Term {
                positive: t.positive | term.positive,
                negative: t.negative | term.negative,
            })
            .filter(|t| !t.contradictory())
            .collect();
    }

    /// Appends `term` as a new disjunct.
    pub fn or(&mut self, term: Term) {
        debug_assert!(!term.contradictory());
        self.terms.push(term);
    }

    /// `¬(p₁ & … & ~n₁ & …)` rewritten as `(~p₁ | … | n₁ | …)`.
    pub fn negated(term: Term) -> Criterion {
        let mut ret = Criterion::rejecting();
        for &(cat, _) in Category::NAMES {
            if term.positive.contains(cat) {
                ret.or(Term::new(Category::empty(), cat));
            } else if term.negative.contains(cat) {
                ret.or(Term::new(cat, Category::empty()));
            }
        }
        ret
    }

    /// Conjunction of two criteria: the pairwise product of their terms,
    /// contradictions dropped.
    pub fn mul(&mut self, rhs: &Criterion) {
        let mut ret = Criterion::rejecting();
        for t1 in &self.terms {
            for t2 in &rhs.terms {
                let t = Term {
                    positive: t1.positive | t2.positive,
                    negative: t1.negative | t2.negative,
                };
                if !t.contradictory() {
                    ret.terms.push(t);
                }
            }
        }
        *self = ret;
    }

    /// Rejects whatever `term` accepts: conjoin with the negation of `term`.
    pub fn and_not(&mut self, term: Term) {
        let neg = Criterion::negated(term);
        self.mul(&neg);
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{term}")?;
        }
        Ok(())
    }
}

/// Error parsing the textual form of a criterion.
#[derive(Debug, thiserror::Error)]
#[error("invalid criterion: {0}")]
pub struct ParseCriterionError(String);

impl FromStr for Criterion {
    type Err = ParseCriterionError;

    /// Parses the shape `Display` produces: `(a & ~b) | (c) | (1)`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut cri = Criterion::rejecting();
        let s = s.trim();
        if s.is_empty() {
            return Ok(cri);
        }
        for part in s.split('|') {
            let part = part.trim();
            let inner = part
                .strip_prefix('(')
                .and_then(|p| p.strip_suffix(')'))
                .ok_or_else(|| ParseCriterionError(format!("expected parenthesized term: {part}")))?
                .trim();

            let mut term = Term::any();
            if inner != "1" {
                for factor in inner.split('&') {
                    let factor = factor.trim();
                    let (negated, name) = match factor.strip_prefix('~') {
                        Some(name) => (true, name),
                        None => (false, factor),
                    };
                    let cat = Category::from_single_name(name)
                        .ok_or_else(|| ParseCriterionError(format!("unknown category: {name}")))?;
                    if negated {
                        term.negative |= cat;
                    } else {
                        term.positive |= cat;
                    }
                }
            }
            if !term.contradictory() {
                cri.or(term);
            }
        }
        Ok(cri)
    }
}

/// Formats a half-open interval the way all range diagnostics phrase it.
pub fn range_fmt(start: u64, end: u64) -> String {
    format!("[{start:#x}, {end:#x})")
}

/// The diagnostic sink.
///
/// Holds the frozen criteria, the message counter and the output stream.
/// Loaders take `&Diagnostics`; emission never affects control flow.
pub struct Diagnostics {
    warning_criteria: Criterion,
    error_criteria: Criterion,
    show_refs: bool,
    error_count: Cell<u64>,
    sink: RefCell<Box<dyn Write>>,
}

impl Diagnostics {
    /// A sink printing to standard output.
    pub fn new(warning_criteria: Criterion, error_criteria: Criterion, show_refs: bool) -> Self {
        Self::with_writer(
            warning_criteria,
            error_criteria,
            show_refs,
            Box::new(io::stdout()),
        )
    }

    /// A sink printing to an arbitrary writer. Tests capture output this way.
    pub fn with_writer(
        warning_criteria: Criterion,
        error_criteria: Criterion,
        show_refs: bool,
        sink: Box<dyn Write>,
    ) -> Self {
        Diagnostics {
            warning_criteria,
            error_criteria,
            show_refs,
            error_count: Cell::new(0),
            sink: RefCell::new(sink),
        }
    }

    pub fn warning_criteria(&self) -> &Criterion {
        &self.warning_criteria
    }

    pub fn error_criteria(&self) -> &Criterion {
        &self.error_criteria
    }

    /// Number of diagnostics printed so far. Any printed diagnostic counts
    /// against exit success, warnings included.
    pub fn error_count(&self) -> u64 {
        self.error_count.get()
    }

    /// Whether a message of this category would be printed at all.
    pub fn accepts(&self, cat: Category) -> bool {
        self.warning_criteria.accepts(cat)
    }

    fn emit(&self, severity: &str, wh: Option<&Where>, msg: fmt::Arguments<'_>) {
        let mut sink = self.sink.borrow_mut();
        match wh {
            Some(wh) => {
                let _ = writeln!(sink, "{severity}: {wh}: {msg}");
                if self.show_refs {
                    for link in wh.caused_by_chain() {
                        let _ = writeln!(sink, "{severity}: {link}: caused by this reference.");
                    }
                }
            }
            None => {
                let _ = writeln!(sink, "{severity}: {msg}");
            }
        }
        self.error_count.set(self.error_count.get() + 1);
    }

    /// Unconditionally prints an error.
    pub fn error(&self, wh: &Where, msg: fmt::Arguments<'_>) {
        self.emit("error", Some(wh), msg);
    }

    /// An error that is not tied to any section coordinate.
    pub fn error_plain(&self, msg: fmt::Arguments<'_>) {
        self.emit("error", None, msg);
    }

    /// Unconditionally prints a warning. Still counts against exit success.
    pub fn warning(&self, wh: &Where, msg: fmt::Arguments<'_>) {
        self.emit("warning", Some(wh), msg);
    }

    /// Prints iff the warning criterion accepts `cat`; escalated to error
    /// severity iff the error criterion also accepts it.
    pub fn message(&self, cat: Category, wh: &Where, msg: fmt::Arguments<'_>) {
        if self.warning_criteria.accepts(cat) {
            if self.error_criteria.accepts(cat) {
                self.error(wh, msg);
            } else {
                self.warning(wh, msg);
            }
        }
    }

    /// Reports a span of unnecessary zero padding.
    pub fn padding_zero(&self, cat: Category, wh: &Where, start: u64, end: u64) {
        self.message(
            cat | Category::ACC_BLOAT | Category::IMPACT_1,
            wh,
            format_args!(
                "{}: unnecessary padding with zero bytes.",
                range_fmt(start, end)
            ),
        );
    }

    /// Reports a span of unreferenced bytes that are not all zero.
    pub fn padding_nonzero(&self, cat: Category, wh: &Where, start: u64, end: u64) {
        self.message(
            cat | Category::ACC_BLOAT | Category::IMPACT_1,
            wh,
            format_args!("{}: unreferenced non-zero bytes.", range_fmt(start, end)),
        );
    }

    fn leb128_bloat(&self, wh: &Where, what: &str, value: fmt::Arguments<'_>, raw: &[u8]) {
        let encoded: Vec<String> = raw.iter().map(|b| format!("{b:02x}")).collect();
        self.message(
            Category::LEB128 | Category::ACC_BLOAT | Category::IMPACT_3,
            wh,
            format_args!(
                "{what}: value {value} encoded as `{}'.",
                encoded.join(" ")
            ),
        );
    }
}

/// Reads an unsigned LEB128 value, reporting failure and encoded bloat
/// through the sink. `what` names the datum in either message.
pub fn checked_uleb128(
    ctx: &mut ReadCtx<'_>,
    diag: &Diagnostics,
    wh: &Where,
    what: &str,
) -> Option<u64> {
    let start = ctx.offset() as usize;
    match ctx.read_uleb128() {
        None => {
            diag.error(wh, format_args!("can't read {what}."));
            None
        }
        Some((value, bloat)) => {
            if bloat {
                let raw = &ctx.data()[start..ctx.offset() as usize];
                diag.leb128_bloat(wh, what, format_args!("{value:#x}"), raw);
            }
            Some(value)
        }
    }
}

/// Signed counterpart of [`checked_uleb128`].
pub fn checked_sleb128(
    ctx: &mut ReadCtx<'_>,
    diag: &Diagnostics,
    wh: &Where,
    what: &str,
) -> Option<i64> {
    let start = ctx.offset() as usize;
    match ctx.read_sleb128() {
        None => {
            diag.error(wh, format_args!("can't read {what}."));
            None
        }
        Some((value, bloat)) => {
            if bloat {
                let raw = &ctx.data()[start..ctx.offset() as usize];
                let sign = if value < 0 { "-" } else { "" };
                diag.leb128_bloat(
                    wh,
                    what,
                    format_args!("{sign}{:#x}", value.unsigned_abs()),
                    raw,
                );
            }
            Some(value)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    pub struct SharedSink(pub Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture() -> (Diagnostics, SharedSink) {
        let sink = SharedSink::default();
        let mut warning = Criterion::rejecting();
        warning.or(Term::any());
        let mut error = Criterion::rejecting();
        error.or(Term::new(Category::IMPACT_4, Category::empty()));
        error.or(Term::new(Category::ERROR, Category::empty()));
        let diag = Diagnostics::with_writer(warning, error, false, Box::new(sink.clone()));
        (diag, sink)
    }

    impl SharedSink {
        pub fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn test_where_formatting() {
        let mut wh = Where::new(SectionId::Info);
        assert_eq!(wh.to_string(), ".debug_info");
        wh.reset_1(0);
        assert_eq!(wh.to_string(), ".debug_info: CU 0");
        wh.reset_2(0x11);
        assert_eq!(wh.to_string(), ".debug_info: CU 0: DIE 0x11");

        let mut abbr = Where::new(SectionId::Abbrev);
        abbr.reset_1(0);
        abbr.reset_2(1);
        assert_eq!(abbr.to_string(), ".debug_abbrev: section 0: abbreviation 1");
        abbr.reset_3(0x7);
        assert_eq!(
            abbr.to_string(),
            ".debug_abbrev: section 0: abbreviation 1: abbr. attribute 0x7"
        );
        abbr.reset_1(2);
        assert_eq!(abbr.to_string(), ".debug_abbrev: section 2");

        let mut wh = Where::new(SectionId::Info);
        wh.reset_1(4);
        wh.set_format(WhereFormat::CuDie);
        assert_eq!(wh.to_string(), ".debug_info: CU DIE 4");
    }

    #[test]
    fn test_where_reloc_formatting() {
        let mut parent = Where::new(SectionId::Info);
        parent.reset_1(0);
        let mut wh = Where::new(SectionId::Rel);
        wh.set_context(Some(&parent));
        wh.reset_1(3);
        wh.reset_2(0x10);
        assert_eq!(
            wh.to_string(),
            ".rel.debug_info: relocation 3: offset 0x10"
        );
    }

    #[test]
    fn test_criterion_accepts() {
        let mut cri = Criterion::rejecting();
        assert!(!cri.accepts(Category::LINE));
        cri.or(Term::any());
        assert!(cri.accepts(Category::LINE));

        cri.and(Term::new(Category::empty(), Category::ACC_BLOAT));
        assert!(cri.accepts(Category::LINE));
        assert!(!cri.accepts(Category::LINE | Category::ACC_BLOAT));
    }

    #[test]
    fn test_criterion_and_not() {
        // Reject messages that are line & header & acc_bloat all at once.
        let mut cri = Criterion::rejecting();
        cri.or(Term::any());
        cri.and_not(Term::new(
            Category::LINE | Category::HEADER | Category::ACC_BLOAT,
            Category::empty(),
        ));

        assert!(cri.accepts(Category::LINE | Category::HEADER));
        assert!(cri.accepts(Category::LINE | Category::ACC_BLOAT));
        assert!(!cri.accepts(Category::LINE | Category::HEADER | Category::ACC_BLOAT));
    }

    #[test]
    fn test_criterion_roundtrip() {
        let mut cri = Criterion::rejecting();
        cri.or(Term::new(Category::IMPACT_4, Category::empty()));
        cri.or(Term::new(
            Category::LINE | Category::HEADER,
            Category::ACC_BLOAT,
        ));
        cri.or(Term::any());

        let text = cri.to_string();
        assert_eq!(text, "(impact_4) | (~acc_bloat & line & header) | (1)");
        let parsed: Criterion = text.parse().unwrap();
        assert_eq!(parsed, cri);

        // Contradictory terms are dropped on parse.
        let parsed: Criterion = "(line & ~line) | (elf)".parse().unwrap();
        assert_eq!(parsed.to_string(), "(elf)");
    }

    #[test]
    fn test_message_selection() {
        let (diag, sink) = capture();
        let mut wh = Where::new(SectionId::Line);
        wh.reset_1(0);

        // Accepted, not escalated.
        diag.message(
            Category::LINE | Category::IMPACT_2,
            &wh,
            format_args!("suspicious."),
        );
        // Accepted and escalated through the error bit.
        diag.message(
            Category::LINE | Category::ERROR,
            &wh,
            format_args!("broken."),
        );
        assert_eq!(
            sink.contents(),
            "warning: .debug_line: table 0: suspicious.\n\
             error: .debug_line: table 0: broken.\n"
        );
        assert_eq!(diag.error_count(), 2);
    }

    #[test]
    fn test_message_suppressed() {
        let sink = SharedSink::default();
        let mut warning = Criterion::rejecting();
        warning.or(Term::any());
        warning.and(Term::new(Category::empty(), Category::ACC_BLOAT));
        let diag = Diagnostics::with_writer(
            warning,
            Criterion::rejecting(),
            false,
            Box::new(sink.clone()),
        );

        let wh = Where::new(SectionId::Line);
        diag.message(
            Category::LINE | Category::ACC_BLOAT,
            &wh,
            format_args!("bloat."),
        );
        assert_eq!(sink.contents(), "");
        assert_eq!(diag.error_count(), 0);
    }

    #[test]
    fn test_caused_by_chain() {
        let sink = SharedSink::default();
        let mut warning = Criterion::rejecting();
        warning.or(Term::any());
        let diag = Diagnostics::with_writer(
            warning,
            Criterion::rejecting(),
            true,
            Box::new(sink.clone()),
        );

        let mut referrer = Where::new(SectionId::Info);
        referrer.reset_1(0);
        let mut wh = Where::new_caused_by(SectionId::Ranges, &referrer);
        wh.reset_1(0x10);
        diag.error(&wh, format_args!("range definitions overlap."));
        assert_eq!(
            sink.contents(),
            "error: .debug_ranges: rangelist 0x10: range definitions overlap.\n\
             error: .debug_info: CU 0: caused by this reference.\n"
        );
    }
}
