//! Relocation bookkeeping for debug sections.
//!
//! Each debug section may carry a `SHT_REL`/`SHT_RELA` companion. Its
//! entries are validated once up front ([`read_rel`]), sorted by offset, and
//! then consumed in lockstep with the section reader: every reader that
//! decodes a field which may legally be relocated calls
//! [`RelocData::next`] with the field's offset right after the read, and
//! [`RelocData::apply`] rewrites the just-read value for `ET_REL` inputs.
//!
//! Entries the readers never ask for are drained at end of section via
//! [`RelocData::skip_rest`] so that stray relocations are reported too.

use std::cell::Cell;

use crate::elf::{ElfFile, SHN_ABS, SHN_COMMON, SHN_UNDEF};
use crate::messages::{Category, Diagnostics, SectionId, Where};
use crate::readctx::ReadCtx;

/// What a relocated field is expected to point at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelocTarget {
    /// An offset into a specific debug section.
    Section(SectionId),
    /// An opaque target value.
    Value,
    /// An address; `SHN_UNDEF` and `SHN_COMMON` symbols are acceptable.
    Address,
    /// An address that should land in executable code.
    Exec,
    /// The datum must not be relocated at all.
    Invalid,
}

/// One validated relocation entry.
#[derive(Clone, Debug, Default)]
pub struct RelocEntry {
    pub offset: u64,
    pub symndx: usize,
    pub rtype: u32,
    pub addend: i64,
    /// Entry failed validation in [`read_rel`]; it is skipped silently.
    pub invalid: bool,
}

/// An unvalidated relocation entry as extracted from the container.
#[derive(Clone, Copy, Debug)]
pub struct RawReloc {
    pub offset: u64,
    pub symndx: usize,
    pub rtype: u32,
    /// `None` for `SHT_REL`, whose addend is implicit in the section data.
    pub addend: Option<i64>,
}

/// How to report entries the cursor passes over.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReport {
    /// The skipped portion was never referenced by the reader.
    Unref,
    /// A reader was here but did not expect a relocation.
    Mismatched,
    /// Skip silently.
    Ok,
}

/// The relocation stream attached to one debug section.
#[derive(Debug, Default)]
pub struct RelocData {
    /// `SectionId::Rel` or `SectionId::Rela`.
    pub kind: Option<SectionId>,
    /// The relocated debug section.
    pub target_sec: Option<SectionId>,
    pub entries: Vec<RelocEntry>,
    /// Whether a symbol table is available for [`apply`](Self::apply).
    pub symtab: bool,
    cursor: Cell<usize>,
}

impl RelocData {
    fn reloc_where(&self, idx: usize, wh: &Where) -> Where {
        let kind = self.kind.unwrap_or(SectionId::Rel);
        let mut reloc_wh = Where::new_caused_by(kind, wh);
        reloc_wh.set_context(Some(wh));
        reloc_wh.reset_1(idx as u64);
        reloc_wh.reset_2(self.entries[idx].offset);
        reloc_wh
    }

    /// Advances the cursor up to `offset` and yields the entry sitting
    /// exactly there, if any. Valid entries strictly before `offset` are
    /// reported according to `report`; invalid ones are always skipped.
    pub fn next(
        &self,
        offset: u64,
        wh: &Where,
        report: SkipReport,
        diag: &Diagnostics,
    ) -> Option<&RelocEntry> {
        while self.cursor.get() < self.entries.len() {
            let idx = self.cursor.get();
            let rel = &self.entries[idx];

            // This relocation entry is ahead of us.
            if rel.offset > offset {
                return None;
            }

            self.cursor.set(idx + 1);

            if rel.invalid {
                continue;
            }

            if rel.offset < offset {
                if report != SkipReport::Ok {
                    let reloc_wh = self.reloc_where(idx, wh);
                    let msg = match report {
                        SkipReport::Unref => {
                            "relocation targets unreferenced portion of the section."
                        }
                        _ => "relocation is mismatched.",
                    };
                    diag.error(&reloc_wh, format_args!("{msg}"));
                }
                continue;
            }

            return Some(rel);
        }

        None
    }

    /// Skips all entries strictly before `offset`, leaving the cursor so
    /// that a following [`next`](Self::next) call can still yield an entry
    /// at `offset` itself.
    pub fn skip(&self, offset: u64, wh: &Where, report: SkipReport, diag: &Diagnostics) {
        if offset > 0 {
            self.next(offset - 1, wh, report, diag);
        }
    }

    /// Drains all remaining entries, reporting each as mismatched.
    pub fn skip_rest(&self, sec: SectionId, diag: &Diagnostics) {
        if !self.entries.is_empty() {
            self.next(u64::MAX, &Where::new(sec), SkipReport::Mismatched, diag);
        }
    }

    /// Applies `rel` to a just-read integer of `width` bytes.
    ///
    /// Validates the relocation's width against the datum, resolves the
    /// symbol and checks that its section matches what the field is
    /// expected to point at. For `ET_REL` files the value is rewritten to
    /// `addend + symbol`, masked to the relocation width. Returns the
    /// symbol's section index when the symbol could be obtained.
    pub fn apply(
        &self,
        file: &ElfFile<'_>,
        rel: &RelocEntry,
        width: u8,
        value: &mut u64,
        wh: &Where,
        target: RelocTarget,
        diag: &Diagnostics,
    ) -> Option<usize> {
        if rel.invalid {
            return None;
        }

        // The cursor has already been advanced past this entry.
        let idx = self.cursor.get().saturating_sub(1);
        let reloc_wh = self.reloc_where(idx, wh);

        if target == RelocTarget::Invalid {
            diag.message(
                Category::IMPACT_3 | Category::RELOC,
                &reloc_wh,
                format_args!("relocates a datum that shouldn't be relocated."),
            );
            return None;
        }

        let rel_width = match simple_width(file.machine, rel.rtype) {
            Some(w) => w,
            // Already diagnosed during the isolated validation of the
            // relocation section.
            None => return None,
        };

        if rel_width != width {
            diag.error(
                &reloc_wh,
                format_args!("{rel_width}-byte relocation relocates {width}-byte datum."),
            );
        }

        // Tolerate that we might have failed to obtain the symbol table.
        if !self.symtab {
            return None;
        }

        let symbol = match file.symbols.get(rel.symndx) {
            Some(sym) => sym,
            None => {
                diag.error(
                    &reloc_wh,
                    format_args!("couldn't obtain symbol #{}.", rel.symndx),
                );
                return None;
            }
        };

        let section_index = symbol.shndx;

        // For ET_REL files section layout is simulated without updating the
        // symbol table, so a section symbol's value is the section's
        // assigned address.
        let mut sym_value = symbol.value;
        if file.is_rel() && symbol.st_type() == goblin::elf::sym::STT_SECTION {
            sym_value = file
                .sections
                .get(section_index)
                .map(|sec| sec.sh_addr)
                .unwrap_or(0);
        }

        match target {
            RelocTarget::Value | RelocTarget::Address | RelocTarget::Exec => {
                let acceptable = section_index == SHN_ABS
                    || (target == RelocTarget::Address
                        && (section_index == SHN_UNDEF || section_index == SHN_COMMON));
                if !acceptable {
                    if target != RelocTarget::Address && section_index == SHN_UNDEF {
                        diag.error(
                            &reloc_wh,
                            format_args!(
                                "relocation of an address is formed against SHN_UNDEF symbol \
                                 (symtab index {}).",
                                rel.symndx
                            ),
                        );
                    } else if let Some(sec) = file.sections.get(section_index) {
                        if sec.sh_flags & u64::from(goblin::elf::section_header::SHF_ALLOC) == 0 {
                            diag.message(
                                Category::RELOC | Category::IMPACT_3,
                                &reloc_wh,
                                format_args!("associated section {} isn't SHF_ALLOC.", sec.name),
                            );
                        }
                        if target == RelocTarget::Exec
                            && sec.sh_flags
                                & u64::from(goblin::elf::section_header::SHF_EXECINSTR)
                                == 0
                        {
                            // May still be kosher, but it's suspicious.
                            diag.message(
                                Category::RELOC | Category::IMPACT_2,
                                &reloc_wh,
                                format_args!(
                                    "relocation against {} is suspicious, \
                                     expected executable section.",
                                    sec.name
                                ),
                            );
                        }
                    }
                }
            }
            RelocTarget::Section(expected) => match file.sections.get(section_index) {
                None => {
                    diag.error(
                        &reloc_wh,
                        format_args!("invalid associated section #{section_index}."),
                    );
                }
                Some(sec) if sec.id != Some(expected) => {
                    let got = match sec.id {
                        Some(id) => id.name(),
                        None => sec.name.as_str(),
                    };
                    diag.error(
                        &reloc_wh,
                        format_args!(
                            "relocation references section {got}, but {} was expected.",
                            expected.name()
                        ),
                    );
                }
                Some(_) => {}
            },
            RelocTarget::Invalid => unreachable!(),
        }

        // Only do the actual relocation for ET_REL files. For the rest, the
        // checking above is all there is to do.
        if file.is_rel() {
            *value = (rel.addend as u64).wrapping_add(sym_value);
            if rel_width == 4 {
                *value &= u64::from(u32::MAX);
            }
        }

        Some(section_index)
    }
}

/// The lockstep pairing used by every reader: fetch the entry due at
/// `offset` (reporting passed-over entries as mismatched), apply it to the
/// just-read `value`, and return the relocation symbol's section index.
///
/// The outer `Option` is `None` when no entry was due at `offset`; callers
/// use that to report a missing relocation in `ET_REL` files.
#[allow(clippy::too_many_arguments)]
pub fn next_and_apply(
    reloc: Option<&RelocData>,
    file: &ElfFile<'_>,
    offset: u64,
    width: u8,
    value: &mut u64,
    wh: &Where,
    target: RelocTarget,
    diag: &Diagnostics,
) -> Option<Option<usize>> {
    let data = reloc?;
    let rel = data.next(offset, wh, SkipReport::Mismatched, diag)?;
    Some(data.apply(file, rel, width, value, wh, target, diag))
}

/// Maps a relocation type to the width of the datum it patches.
///
/// This is the per-architecture seam: only simple absolute and pc-relative
/// data relocations make sense in debug sections, anything else is rejected
/// by [`read_rel`].
pub fn simple_width(machine: u16, rtype: u32) -> Option<u8> {
    use goblin::elf::header::{EM_386, EM_AARCH64, EM_ARM, EM_PPC64, EM_S390, EM_X86_64};
    use goblin::elf::reloc::*;

    // goblin carries no relocation constants for ppc64 and s390.
    const R_PPC64_ADDR32: u32 = 1;
    const R_PPC64_ADDR16: u32 = 3;
    const R_PPC64_REL32: u32 = 26;
    const R_PPC64_ADDR64: u32 = 38;
    const R_PPC64_REL64: u32 = 44;
    const R_390_8: u32 = 1;
    const R_390_16: u32 = 3;
    const R_390_32: u32 = 4;
    const R_390_PC32: u32 = 5;
    const R_390_64: u32 = 22;
    const R_390_PC64: u32 = 23;

    match machine {
        EM_X86_64 => match rtype {
            R_X86_64_64 | R_X86_64_PC64 => Some(8),
            R_X86_64_32 | R_X86_64_32S | R_X86_64_PC32 => Some(4),
            R_X86_64_16 | R_X86_64_PC16 => Some(2),
            R_X86_64_8 | R_X86_64_PC8 => Some(1),
            _ => None,
        },
        EM_386 => match rtype {
            R_386_32 | R_386_PC32 => Some(4),
            R_386_16 | R_386_PC16 => Some(2),
            R_386_8 | R_386_PC8 => Some(1),
            _ => None,
        },
        EM_AARCH64 => match rtype {
            R_AARCH64_ABS64 | R_AARCH64_PREL64 => Some(8),
            R_AARCH64_ABS32 | R_AARCH64_PREL32 => Some(4),
            R_AARCH64_ABS16 | R_AARCH64_PREL16 => Some(2),
            _ => None,
        },
        EM_ARM => match rtype {
            R_ARM_ABS32 | R_ARM_REL32 => Some(4),
            R_ARM_ABS16 => Some(2),
            R_ARM_ABS8 => Some(1),
            _ => None,
        },
        EM_PPC64 => match rtype {
            R_PPC64_ADDR64 | R_PPC64_REL64 => Some(8),
            R_PPC64_ADDR32 | R_PPC64_REL32 => Some(4),
            R_PPC64_ADDR16 => Some(2),
            _ => None,
        },
        EM_S390 => match rtype {
            R_390_64 | R_390_PC64 => Some(8),
            R_390_32 | R_390_PC32 => Some(4),
            R_390_16 => Some(2),
            R_390_8 => Some(1),
            _ => None,
        },
        _ => None,
    }
}

/// Validates the raw entry stream of one relocation section and builds the
/// sorted [`RelocData`] for its target debug section.
pub fn read_rel(
    machine: u16,
    little_endian: bool,
    target_sec: SectionId,
    sec_data: &[u8],
    raw: &[RawReloc],
    is_rela: bool,
    diag: &Diagnostics,
) -> RelocData {
    let kind = if is_rela {
        SectionId::Rela
    } else {
        SectionId::Rel
    };
    let parent = Where::new(target_sec);
    let mut wh = Where::new(kind);
    wh.set_context(Some(&parent));

    let mut entries = Vec::with_capacity(raw.len());
    for (i, r) in raw.iter().enumerate() {
        wh.reset_1(i as u64);

        let mut cur = RelocEntry {
            offset: r.offset,
            symndx: r.symndx,
            rtype: r.rtype,
            addend: 0,
            invalid: false,
        };

        if r.rtype == 0 {
            // No relocation.
            diag.message(
                Category::IMPACT_3 | Category::RELOC | Category::ACC_BLOAT,
                &wh,
                format_args!("NONE relocation is superfluous."),
            );
            cur.invalid = true;
            entries.push(cur);
            continue;
        }

        wh.reset_2(cur.offset);

        let width = match simple_width(machine, cur.rtype) {
            Some(w @ (4 | 8)) => w,
            Some(_) => {
                // Technically legal, but never used; more likely these are
                // the result of a bug than actually being intended.
                diag.error(
                    &wh,
                    format_args!("8 or 16-bit relocation type {}.", cur.rtype),
                );
                cur.invalid = true;
                entries.push(cur);
                continue;
            }
            None => {
                diag.error(&wh, format_args!("invalid relocation {}.", cur.rtype));
                cur.invalid = true;
                entries.push(cur);
                continue;
            }
        };

        if cur.offset + u64::from(width) > sec_data.len() as u64 {
            diag.error(
                &wh,
                format_args!("relocation doesn't fall into relocated section."),
            );
            cur.invalid = true;
            entries.push(cur);
            continue;
        }

        let mut ctx = ReadCtx::new(sec_data, little_endian);
        let value = ctx
            .seek(cur.offset)
            .and_then(|_| ctx.read_var(width))
            .unwrap_or(0);

        if is_rela {
            if value != 0 {
                diag.message(
                    Category::IMPACT_2 | Category::RELOC,
                    &wh,
                    format_args!(
                        "SHT_RELA relocates a place with non-zero value \
                         (addend={:#x}, value={value:#x}).",
                        r.addend.unwrap_or(0)
                    ),
                );
            }
            cur.addend = r.addend.unwrap_or(0);
        } else {
            cur.addend = value as i64;
        }

        entries.push(cur);
    }

    // Sort so that the applicable addresses are monotonically increasing.
    entries.sort_by_key(|rel| rel.offset);

    RelocData {
        kind: Some(kind),
        target_sec: Some(target_sec),
        entries,
        symtab: false,
        cursor: Cell::new(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Criterion, Term};
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn capture() -> (Diagnostics, SharedSink) {
        let sink = SharedSink::default();
        let mut warning = Criterion::rejecting();
        warning.or(Term::any());
        let diag = Diagnostics::with_writer(
            warning,
            Criterion::rejecting(),
            false,
            Box::new(sink.clone()),
        );
        (diag, sink)
    }

    fn entries(offsets: &[u64]) -> RelocData {
        RelocData {
            kind: Some(SectionId::Rel),
            target_sec: Some(SectionId::Info),
            entries: offsets
                .iter()
                .map(|&offset| RelocEntry {
                    offset,
                    rtype: goblin::elf::reloc::R_X86_64_32,
                    ..Default::default()
                })
                .collect(),
            symtab: false,
            cursor: Default::default(),
        }
    }

    #[test]
    fn test_next_stops_at_offset() {
        let (diag, _sink) = capture();
        let rels = entries(&[0x10, 0x20, 0x30]);
        let wh = Where::new(SectionId::Info);

        assert!(rels.next(0x08, &wh, SkipReport::Ok, &diag).is_none());
        let rel = rels.next(0x10, &wh, SkipReport::Ok, &diag).unwrap();
        assert_eq!(rel.offset, 0x10);
        // The cursor now rests on the first entry with a larger offset.
        let rel = rels.next(0x30, &wh, SkipReport::Ok, &diag).unwrap();
        assert_eq!(rel.offset, 0x30);
        assert_eq!(diag.error_count(), 0);
    }

    #[test]
    fn test_next_reports_skipped() {
        let (diag, sink) = capture();
        let rels = entries(&[0x10]);
        let wh = Where::new(SectionId::Info);

        assert!(rels
            .next(0x20, &wh, SkipReport::Mismatched, &diag)
            .is_none());
        assert_eq!(
            String::from_utf8(sink.0.lock().unwrap().clone()).unwrap(),
            "error: .rel.debug_info: relocation 0: offset 0x10: relocation is mismatched.\n"
        );
    }

    #[test]
    fn test_skip_rest_is_idempotent() {
        let (diag, _sink) = capture();
        let rels = entries(&[0x10, 0x20]);

        rels.skip_rest(SectionId::Info, &diag);
        let count = diag.error_count();
        assert_eq!(count, 2);

        rels.skip_rest(SectionId::Info, &diag);
        assert_eq!(diag.error_count(), count);
    }

    #[test]
    fn test_read_rel_validation() {
        let (diag, sink) = capture();
        let data = vec![0u8; 16];
        let raw = [
            // NONE relocation.
            RawReloc {
                offset: 0,
                symndx: 0,
                rtype: 0,
                addend: None,
            },
            // Entry outside the section.
            RawReloc {
                offset: 14,
                symndx: 0,
                rtype: goblin::elf::reloc::R_X86_64_32,
                addend: None,
            },
            // Good entry; implicit addend read from the section bytes.
            RawReloc {
                offset: 4,
                symndx: 1,
                rtype: goblin::elf::reloc::R_X86_64_64,
                addend: None,
            },
        ];
        let mut data = data;
        data[4] = 0x2a;

        let rels = read_rel(
            goblin::elf::header::EM_X86_64,
            true,
            SectionId::Info,
            &data,
            &raw,
            false,
            &diag,
        );

        assert_eq!(rels.entries.len(), 3);
        let good: Vec<_> = rels.entries.iter().filter(|r| !r.invalid).collect();
        assert_eq!(good.len(), 1);
        assert_eq!(good[0].offset, 4);
        assert_eq!(good[0].addend, 0x2a);

        let out = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        assert!(out.contains("NONE relocation is superfluous."));
        assert!(out.contains("relocation doesn't fall into relocated section."));
    }

    #[test]
    fn test_simple_width() {
        use goblin::elf::header::{EM_386, EM_X86_64};
        assert_eq!(simple_width(EM_X86_64, goblin::elf::reloc::R_X86_64_64), Some(8));
        assert_eq!(simple_width(EM_X86_64, goblin::elf::reloc::R_X86_64_32), Some(4));
        assert_eq!(simple_width(EM_386, goblin::elf::reloc::R_386_32), Some(4));
        assert_eq!(simple_width(EM_386, 0xffff), None);
    }
}
