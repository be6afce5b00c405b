//! Pedantic structural checking of DWARF debugging information in ELF
//! files.
//!
//! The checker re-reads every `.debug_*` section from its raw bytes,
//! reconstructs the objects the section describes, cross-links them by
//! offset, and reports every violation of the DWARF specification it can
//! prove from the wire form, plus legal-but-wasteful constructs. It does
//! not repair files, emit DWARF, or evaluate semantics.
//!
//! The sections are processed in dependency order: `.debug_abbrev` first,
//! then `.debug_info` (which consumes the abbreviation tables and produces
//! the CU records), then ranges, loc, aranges, pubnames, pubtypes and line,
//! all of which cross-check against the CU records. Every diagnostic
//! carries a [`Where`] coordinate and a [`Category`] bitset; the configured
//! criteria decide whether it prints as a warning, as an error, or not at
//! all.
//!
//! ```no_run
//! use dwarfcheck::{check_file, CheckConfig, Diagnostics};
//!
//! let config = CheckConfig::default();
//! let diag = Diagnostics::from_config(&config);
//! let data = std::fs::read("module.o").unwrap();
//! check_file(&data, &diag, &config, None);
//! assert_eq!(diag.error_count(), 0);
//! ```

pub mod abbrev;
pub mod aranges;
pub mod coverage;
pub mod elf;
pub mod hl;
pub mod info;
pub mod line;
pub mod locranges;
pub mod messages;
pub mod pubtables;
pub mod readctx;
pub mod reloc;

pub use crate::elf::{ElfFile, ScanError};
pub use crate::hl::HighLevelChecker;
pub use crate::messages::{Category, Criterion, Diagnostics, SectionId, Term, Where};

use crate::info::CuCoverage;
use crate::readctx::ReadCtx;

/// Resolved command-line configuration.
#[derive(Clone, Debug)]
pub struct CheckConfig {
    /// Suppress the "No errors" message.
    pub quiet: bool,
    /// Print the resolved criteria before checking.
    pub verbose: bool,
    /// Don't complain if files have no DWARF at all.
    pub ignore_missing: bool,
    /// Accept all categories.
    pub strict: bool,
    /// The binary comes from a GNU toolchain and is known to be wasteful
    /// in ways there is no point flagging.
    pub gnu: bool,
    /// Don't output certain common error messages.
    pub tolerant: bool,
    /// Print the "caused by" chain under each diagnostic.
    pub show_refs: bool,
    /// Run the high-level checks when an implementation is supplied.
    pub high_level: bool,
}

impl Default for CheckConfig {
    fn default() -> Self {
        CheckConfig {
            quiet: false,
            verbose: false,
            ignore_missing: false,
            strict: false,
            gnu: false,
            tolerant: false,
            show_refs: false,
            high_level: true,
        }
    }
}

/// Builds the warning and error criteria for a configuration.
///
/// The warning criterion starts out accepting everything and the flags
/// subtract; the error criterion escalates impact-4 messages and those
/// carrying the error bit.
pub fn assemble_criteria(config: &CheckConfig) -> (Criterion, Criterion) {
    let mut warning = Criterion::rejecting();
    warning.or(Term::any());

    let mut error = Criterion::rejecting();
    error.or(Term::new(Category::IMPACT_4, Category::empty()));
    error.or(Term::new(Category::ERROR, Category::empty()));

    if config.ignore_missing {
        warning.and(Term::new(Category::empty(), Category::ELF));
    }

    if config.gnu {
        warning.and(Term::new(Category::empty(), Category::ACC_BLOAT));
    }

    if !config.strict {
        warning.and(Term::new(Category::empty(), Category::STRINGS));
        warning.and_not(Term::new(
            Category::LINE | Category::HEADER | Category::ACC_BLOAT,
            Category::empty(),
        ));
        warning.and(Term::new(Category::empty(), Category::PUBTYPES));
    }

    if config.tolerant {
        warning.and(Term::new(Category::empty(), Category::LOC));
        warning.and(Term::new(Category::empty(), Category::RANGES));
    }

    (warning, error)
}

impl Diagnostics {
    /// A stdout-printing sink with the criteria a configuration implies.
    pub fn from_config(config: &CheckConfig) -> Self {
        let (warning, error) = assemble_criteria(config);
        Diagnostics::new(warning, error, config.show_refs)
    }
}

/// Runs the whole structural check over one ELF object.
///
/// All diagnostics go through `diag`; nothing survives the call. A file
/// whose container cannot be parsed yields a single error.
pub fn check_file(
    data: &[u8],
    diag: &Diagnostics,
    config: &CheckConfig,
    hl: Option<&dyn HighLevelChecker>,
) {
    let mut file = match ElfFile::parse(data, diag) {
        Ok(file) => file,
        Err(err) => {
            diag.error_plain(format_args!("Error processing ELF file: {err}."));
            return;
        }
    };
    file.layout_rel();
    let file = file;

    let hl = if config.high_level { hl } else { None };

    let span = tracing::debug_span!("check_file", etype = file.etype);
    let _enter = span.enter();

    // Abbreviations come first, everything in .debug_info keys into them.
    let abbrev_tables = match file
        .debug_section_data(SectionId::Abbrev)
        .and_then(|sec| sec.data)
    {
        Some(data) => {
            let mut ctx = ReadCtx::new(data, file.little_endian);
            abbrev::load_abbrevs(&mut ctx, diag)
        }
        None => {
            if !config.ignore_missing {
                // A hard error, not a message: nothing can be debugged
                // without this.
                diag.error_plain(format_args!(".debug_abbrev data not found."));
            }
            None
        }
    };

    let mut cu_cov = CuCoverage::default();
    let mut cus = None;
    if let Some(tables) = &abbrev_tables {
        match file.debug_section_data(SectionId::Info) {
            Some(sec) => {
                let strings = file
                    .debug_section_data(SectionId::Str)
                    .and_then(|sec| sec.data);
                cus = info::check_info(&file, sec, tables, strings, &mut cu_cov, diag);
                if let (Some(cus), Some(hl)) = (&cus, hl) {
                    hl.check_expected_trees(&file, cus, diag);
                }
            }
            None => {
                if !config.ignore_missing {
                    diag.error_plain(format_args!(".debug_info data not found."));
                }
            }
        }
    }
    let cu_slice: &[info::Cu] = cus.as_deref().unwrap_or(&[]);

    let mut ranges_sound = false;
    if let Some(sec) = file.debug_section_data(SectionId::Ranges) {
        if !cu_slice.is_empty() {
            ranges_sound =
                locranges::check_loc_or_range(&file, sec, cu_slice, Some(&mut cu_cov), diag);
        }
    }

    if let Some(sec) = file.debug_section_data(SectionId::Loc) {
        if !cu_slice.is_empty() {
            locranges::check_loc_or_range(&file, sec, cu_slice, None, diag);
        }
    }

    if let Some(sec) = file.debug_section_data(SectionId::Aranges) {
        // If ranges were needed but never projected, the CU coverage is
        // incomplete; don't compare against it.
        let coverage = if cus.is_some() && !cu_cov.need_ranges {
            Some(&cu_cov.cov)
        } else {
            None
        };
        let sound = aranges::check_aranges(&file, sec, cu_slice, coverage, config, diag);
        if sound && ranges_sound && !config.tolerant && !config.gnu {
            if let Some(hl) = hl {
                hl.check_matching_ranges(&file, cu_slice, diag);
            }
        }
    }

    match file.debug_section_data(SectionId::Pubnames) {
        Some(sec) => {
            pubtables::check_pub(&file, sec, cu_slice, diag);
        }
        None => {
            if !config.ignore_missing {
                diag.message(
                    Category::IMPACT_4 | Category::ACC_SUBOPTIMAL | Category::ELF,
                    &Where::new(SectionId::Pubnames),
                    format_args!("data not found."),
                );
            }
        }
    }

    match file.debug_section_data(SectionId::Pubtypes) {
        Some(sec) => {
            pubtables::check_pub(&file, sec, cu_slice, diag);
        }
        None => {
            if !config.ignore_missing {
                diag.message(
                    Category::IMPACT_4
                        | Category::ACC_SUBOPTIMAL
                        | Category::ELF
                        | Category::PUBTYPES,
                    &Where::new(SectionId::Pubtypes),
                    format_args!("data not found."),
                );
            }
        }
    }

    match file.debug_section_data(SectionId::Line) {
        Some(sec) => {
            line::check_line(&file, sec, cu_slice, diag);
        }
        None => {
            if !config.ignore_missing {
                diag.message(
                    Category::IMPACT_4
                        | Category::ACC_SUBOPTIMAL
                        | Category::ELF
                        | Category::LOC,
                    &Where::new(SectionId::Line),
                    format_args!("data not found."),
                );
            }
        }
    }
}
