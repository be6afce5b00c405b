//! Loader for `.debug_loc` and `.debug_ranges`.
//!
//! Both sections hold the same wire shape: lists of address pairs reached
//! through CU-attached references, with an all-ones escape introducing a
//! base-address selection and a zero pair terminating the list. Location
//! lists additionally carry a 2-byte expression length and the expression
//! bytes after each live entry.
//!
//! A persistent coverage set tracks which bytes any reference has visited:
//! a reference that lands inside another list, or two live entries sharing
//! wire bytes, are both overlap errors.

use gimli::constants as dw;

use crate::coverage::{report_hole, AddrRecord, Coverage, Ref};
use crate::elf::{ElfFile, ElfSection};
use crate::info::{check_range_relocations, Cu, CuCoverage};
use crate::messages::{
    checked_sleb128, checked_uleb128, range_fmt, Category, Diagnostics, SectionId, Where,
};
use crate::readctx::ReadCtx;
use crate::reloc::{next_and_apply, RelocData, RelocTarget, SkipReport};

/// Coverage analysis of `.debug_ranges` against the ELF section table.
/// Kept off; the analysis code is exercised by tests only.
pub(crate) const DO_RANGE_COVERAGE: bool = false;

/// Wire shape of one location-expression operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Operand {
    None,
    Addr,
    Data1,
    Data2,
    Data4,
    Data8,
    Udata,
    Sdata,
}

/// Operand shapes for one opcode, or `None` for an opcode outside the
/// vocabulary.
fn locexpr_operands(opcode: u8) -> Option<(Operand, Operand)> {
    use Operand::*;

    Some(match opcode {
        0x03 => (Addr, None),                // addr
        0x06 => (None, None),                // deref
        0x08 | 0x09 => (Data1, None),        // const1u, const1s
        0x0a | 0x0b => (Data2, None),        // const2u, const2s
        0x0c | 0x0d => (Data4, None),        // const4u, const4s
        0x0e | 0x0f => (Data8, None),        // const8u, const8s
        0x10 => (Udata, None),               // constu
        0x11 => (Sdata, None),               // consts
        0x12..=0x14 => (None, None),         // dup, drop, over
        0x15 => (Data1, None),               // pick
        0x16..=0x22 => (None, None),         // swap .. plus
        0x23 => (Udata, None),               // plus_uconst
        0x24..=0x27 => (None, None),         // shl, shr, shra, xor
        0x28 => (Data2, None),               // bra
        0x29..=0x2e => (None, None),         // eq .. ne
        0x2f => (Data2, None),               // skip
        0x30..=0x4f => (None, None),         // lit0 .. lit31
        0x50..=0x6f => (None, None),         // reg0 .. reg31
        0x70..=0x8f => (Sdata, None),        // breg0 .. breg31
        0x90 => (Udata, None),               // regx
        0x91 => (Sdata, None),               // fbreg
        0x92 => (Udata, Sdata),              // bregx
        0x93 => (Udata, None),               // piece
        0x94 | 0x95 => (Data1, None),        // deref_size, xderef_size
        0x96 | 0x97 => (None, None),         // nop, push_object_address
        0x98 => (Data2, None),               // call2
        0x99 => (Data4, None),               // call4
        0x9a => (Addr, None),                // call_ref
        0x9b | 0x9c => (None, None),         // form_tls_address, call_frame_cfa
        0x9d => (Udata, Udata),              // bit_piece
        _ => return Option::None,
    })
}

fn reloc_target_loc(opcode: u8) -> RelocTarget {
    let op = dw::DwOp(opcode);
    if op == dw::DW_OP_call2 || op == dw::DW_OP_call4 {
        return RelocTarget::Section(SectionId::Info);
    }
    if op == dw::DW_OP_addr {
        return RelocTarget::Address;
    }
    if op != dw::DW_OP_call_ref {
        tracing::debug!(%op, "no relocation target rule for this opcode");
    }
    RelocTarget::Value
}

fn read_operand(
    ctx: &mut ReadCtx<'_>,
    addr_64: bool,
    operand: Operand,
    wh: &Where,
    what: &str,
    diag: &Diagnostics,
) -> Option<u64> {
    match operand {
        Operand::None => Some(0),
        Operand::Addr => ctx.read_offset(addr_64),
        Operand::Data1 => ctx.read_u8().map(u64::from),
        Operand::Data2 => ctx.read_u16().map(u64::from),
        Operand::Data4 => ctx.read_u32().map(u64::from),
        Operand::Data8 => ctx.read_u64(),
        Operand::Udata => checked_uleb128(ctx, diag, wh, what),
        Operand::Sdata => checked_sleb128(ctx, diag, wh, what).map(|v| v as u64),
    }
}

/// Validates one location expression of `length` bytes starting at the
/// parent cursor's position. The parent cursor is not advanced. `init_off`
/// is the section-absolute offset of the expression start, used both for
/// reporting and for pairing relocations.
#[allow(clippy::too_many_arguments)]
pub fn check_location_expression(
    file: &ElfFile<'_>,
    parent_ctx: &ReadCtx<'_>,
    init_off: u64,
    reloc: Option<&RelocData>,
    length: u64,
    wh: &Where,
    addr_64: bool,
    diag: &Diagnostics,
) -> bool {
    let mut ctx = match parent_ctx.sub_here(length) {
        Some(ctx) => ctx,
        None => {
            diag.error(wh, format_args!("not enough data for location expression."));
            return false;
        }
    };

    let mut oprefs: Vec<Ref> = Vec::new();
    let mut opaddrs = AddrRecord::new();

    'expr: while !ctx.eof() {
        let mut opcode_wh = Where::new_caused_by(SectionId::LocExpr, wh);
        let opcode_off = ctx.offset() + init_off;
        opcode_wh.reset_1(opcode_off);
        opaddrs.add(opcode_off);

        let opcode = match ctx.read_u8() {
            Some(opcode) => opcode,
            None => {
                diag.error(&opcode_wh, format_args!("can't read opcode."));
                break;
            }
        };

        let (op1, op2) = match locexpr_operands(opcode) {
            Some(ops) => ops,
            None => {
                diag.error(
                    &opcode_wh,
                    format_args!("can't decode opcode \"{}\".", dw::DwOp(opcode)),
                );
                break;
            }
        };

        let mut values = [0u64; 2];
        for (slot, (operand, what)) in values
            .iter_mut()
            .zip([(op1, "1st operand"), (op2, "2nd operand")])
        {
            if operand == Operand::None {
                continue;
            }
            let off = ctx.offset() + init_off;
            let mut value =
                match read_operand(&mut ctx, addr_64, operand, &opcode_wh, what, diag) {
                    Some(value) => value,
                    None => {
                        diag.error(
                            &opcode_wh,
                            format_args!(
                                "opcode \"{}\": can't read {what}.",
                                dw::DwOp(opcode)
                            ),
                        );
                        break 'expr;
                    }
                };
            next_and_apply(
                reloc,
                file,
                off,
                if addr_64 { 8 } else { 4 },
                &mut value,
                &opcode_wh,
                reloc_target_loc(opcode),
                diag,
            );
            *slot = value;
        }
        let value1 = values[0];

        let op = dw::DwOp(opcode);
        if op == dw::DW_OP_bra || op == dw::DW_OP_skip {
            let skip = value1 as u16 as i16;

            if skip == 0 {
                diag.message(
                    Category::LOC | Category::ACC_BLOAT | Category::IMPACT_3,
                    &opcode_wh,
                    format_args!("{op} with skip 0."),
                );
            } else if skip > 0 && !ctx.need(skip as u64) {
                diag.error(
                    &opcode_wh,
                    format_args!("{op} branches out of location expression."),
                );
            } else if skip < 0 && u64::from(skip.unsigned_abs()) > ctx.offset() {
                diag.error(
                    &opcode_wh,
                    format_args!("{op} branches before the beginning of location expression."),
                );
            } else {
                oprefs.push(Ref {
                    addr: opcode_off.wrapping_add(skip as i64 as u64),
                    who: opcode_wh.clone(),
                });
            }
        } else if op == dw::DW_OP_const8u || op == dw::DW_OP_const8s {
            if !addr_64 {
                diag.error(&opcode_wh, format_args!("{op} on 32-bit machine."));
            }
        } else if !addr_64
            && (op == dw::DW_OP_constu
                || op == dw::DW_OP_consts
                || op == dw::DW_OP_deref_size
                || op == dw::DW_OP_plus_uconst)
            && value1 > u64::from(u32::MAX)
        {
            diag.message(
                Category::LOC | Category::ACC_BLOAT | Category::IMPACT_3,
                &opcode_wh,
                format_args!("{op} with operand {value1:#x} on 32-bit machine."),
            );
        }
    }

    for r in &oprefs {
        if !opaddrs.has(r.addr) {
            diag.error(
                &r.who,
                format_args!("unresolved reference to opcode at {:#x}.", r.addr),
            );
        }
    }

    true
}

/// Tracks coverage of address ranges against the `SHF_ALLOC` sections of
/// the file. Only reachable when [`DO_RANGE_COVERAGE`] is turned on.
struct CoverageMap {
    /// `(section index, coverage, hit, warn-only)` per eligible section.
    scos: Vec<(usize, Coverage, bool, bool)>,
    allow_overlap: bool,
}

impl CoverageMap {
    fn new(file: &ElfFile<'_>, allow_overlap: bool) -> Self {
        use goblin::elf::section_header::{SHF_ALLOC, SHF_EXECINSTR};
        let mask = u64::from(SHF_ALLOC | SHF_EXECINSTR);
        let warn_mask = u64::from(SHF_ALLOC);

        let mut scos = Vec::new();
        for (i, sec) in file.sections.iter().enumerate().skip(1) {
            let normal = sec.sh_flags & mask == mask;
            let warn = sec.sh_flags & warn_mask == warn_mask;
            if normal || warn {
                scos.push((i, Coverage::new(), false, !normal));
            }
        }
        CoverageMap {
            scos,
            allow_overlap,
        }
    }

    /// Projects `[address, address+length)` onto the section table,
    /// reporting ranges that cross sections, overlap previous ranges or
    /// fall outside every `SHF_ALLOC` section.
    fn add(
        &mut self,
        file: &ElfFile<'_>,
        address: u64,
        length: u64,
        wh: &Where,
        cat: Category,
        diag: &Diagnostics,
    ) {
        let mut found = false;
        let mut crosses_boundary = false;
        let mut overlap = false;
        let end = address + length;

        // Whatever part of the range ends up covered by no section at all
        // is reported below.
        let mut range_cov = Coverage::new();

        for (sec_idx, cov, hit, warn) in &mut self.scos {
            let shdr = &file.sections[*sec_idx];
            let s_end = shdr.sh_addr + shdr.sh_size;
            if end <= shdr.sh_addr || address >= s_end {
                continue;
            }

            if found && !crosses_boundary {
                // Probably not an error, but very suspicious.
                diag.message(
                    cat | Category::IMPACT_2,
                    wh,
                    format_args!(
                        "the range {} crosses section boundaries.",
                        range_fmt(address, end)
                    ),
                );
                crosses_boundary = true;
            }
            found = true;

            if length == 0 {
                // Empty ranges cover nothing and fall into no further
                // section.
                break;
            }

            let cov_begin = address.saturating_sub(shdr.sh_addr);
            let cov_end = if end < s_end {
                end - shdr.sh_addr
            } else {
                shdr.sh_size
            };

            if !overlap
                && !self.allow_overlap
                && cov.is_overlap(cov_begin, cov_end - cov_begin)
            {
                // Not a show stopper.
                diag.message(
                    cat | Category::IMPACT_2 | Category::ERROR,
                    wh,
                    format_args!(
                        "the range {} overlaps with another one.",
                        range_fmt(address, end)
                    ),
                );
                overlap = true;
            }

            if *warn {
                diag.message(
                    cat | Category::IMPACT_2,
                    wh,
                    format_args!(
                        "the range {} covers section {}.",
                        range_fmt(address, end),
                        shdr.name
                    ),
                );
            }

            cov.add(cov_begin, cov_end - cov_begin);
            *hit = true;

            let r_delta = shdr.sh_addr.saturating_sub(address);
            range_cov.add(cov_begin + r_delta, cov_end - cov_begin);
        }

        if !found {
            // Not a show stopper either.
            diag.error(
                wh,
                format_args!(
                    "couldn't find a section that the range {} covers.",
                    range_fmt(address, end)
                ),
            );
        } else if length > 0 {
            range_cov.find_holes(0, length, |h_start, h_length| {
                diag.error(
                    wh,
                    format_args!(
                        "portion {} of the range {} doesn't fall into any ALLOC section.",
                        range_fmt(h_start + address, h_start + address + h_length),
                        range_fmt(address, end)
                    ),
                );
                true
            });
        }
    }

    /// Reports addresses of covered sections that no range ever reached.
    fn find_holes(&self, file: &ElfFile<'_>, id: SectionId, cat: Category, diag: &Diagnostics) {
        for (sec_idx, cov, hit, _) in &self.scos {
            let sec = &file.sections[*sec_idx];

            // Some sections are not expected to be covered at all, but a
            // partially covered one gets the same criteria as .text.
            if !hit
                && (sec.sh_flags & u64::from(goblin::elf::section_header::SHF_EXECINSTR) == 0
                    || sec.name == ".init"
                    || sec.name == ".fini"
                    || sec.name == ".plt")
            {
                continue;
            }

            // For REL files, don't print addresses mangled by our layout.
            let base = if file.is_rel() { 0 } else { sec.sh_addr };

            cov.find_holes(0, sec.sh_size, |begin, len| {
                let end = begin + len;
                if let Some(data) = sec.data {
                    if data[begin as usize..end as usize].iter().all(|&b| b == 0) {
                        return true;
                    }
                } else if crate::coverage::necessary_alignment(
                    base + begin,
                    len,
                    sec.sh_addralign,
                ) {
                    return true;
                }

                diag.message(
                    cat | Category::ACC_SUBOPTIMAL | Category::IMPACT_4,
                    &Where::new(id),
                    format_args!(
                        "addresses {} of section {} are not covered.",
                        range_fmt(begin + base, end + base),
                        sec.name
                    ),
                );
                true
            });
        }
    }
}

/// Walks one location or range list starting at `addr`.
#[allow(clippy::too_many_arguments)]
fn check_loc_or_range_ref(
    file: &ElfFile<'_>,
    data: &[u8],
    cu: &Cu,
    sec: &ElfSection<'_>,
    sec_id: SectionId,
    coverage: &mut Coverage,
    mut coverage_map: Option<&mut CoverageMap>,
    mut cu_cov: Option<&mut CuCoverage>,
    addr: u64,
    wh: &Where,
    cat: Category,
    diag: &Diagnostics,
) -> bool {
    let addr_64 = cu.address_size == 8;
    let width = u64::from(cu.address_size);
    let contains_locations = sec_id == SectionId::Loc;
    let reloc = sec.rel.as_ref();

    let mut ctx = ReadCtx::new(data, file.little_endian);
    if ctx.seek(addr).is_none() {
        diag.error(
            wh,
            format_args!(
                "invalid reference outside the section {addr:#x}, size only {:#x}.",
                data.len()
            ),
        );
        return false;
    }

    let mut retval = true;

    if coverage.is_covered(addr, 1) {
        diag.error(
            wh,
            format_args!("reference to {addr:#x} points into another location or range list."),
        );
        retval = false;
    }

    let escape: u64 = if addr_64 {
        u64::MAX
    } else {
        u64::from(u32::MAX)
    };

    let mut overlap = false;
    let mut base: Option<u64> = cu.low_pc;
    // Address space the live entries of this list have claimed so far.
    let mut entry_addresses = Coverage::new();

    while !ctx.eof() {
        let mut entry_wh = Where::new_caused_by(sec_id, wh);
        let entry_off = ctx.offset();
        entry_wh.reset_1(entry_off);

        let mut have_overlap = |coverage: &Coverage, off: u64, len: u64, overlap: &mut bool| {
            if !*overlap && coverage.is_overlap(off, len) {
                diag.error(&entry_wh, format_args!("range definitions overlap."));
                *overlap = true;
                true
            } else {
                false
            }
        };

        // Begin address.
        let begin_off = ctx.offset();
        if have_overlap(coverage, begin_off, width, &mut overlap) {
            retval = false;
        }
        let mut begin_addr = match ctx.read_offset(addr_64) {
            Some(addr) => addr,
            None => {
                diag.error(
                    &entry_wh,
                    format_args!("can't read address range beginning."),
                );
                return false;
            }
        };
        let mut begin_relocated = false;
        let mut begin_shndx: Option<usize> = None;
        if let Some(shndx) = next_and_apply(
            reloc,
            file,
            begin_off,
            cu.address_size,
            &mut begin_addr,
            &entry_wh,
            RelocTarget::Value,
            diag,
        ) {
            begin_relocated = true;
            begin_shndx = shndx;
        }

        // End address.
        let end_off = ctx.offset();
        if have_overlap(coverage, end_off, width, &mut overlap) {
            retval = false;
        }
        let mut end_addr = match ctx.read_offset(addr_64) {
            Some(addr) => addr,
            None => {
                diag.error(&entry_wh, format_args!("can't read address range ending."));
                return false;
            }
        };
        let mut end_relocated = false;
        match next_and_apply(
            reloc,
            file,
            end_off,
            cu.address_size,
            &mut end_addr,
            &entry_wh,
            RelocTarget::Value,
            diag,
        ) {
            Some(end_shndx) => {
                end_relocated = true;
                if begin_addr != escape {
                    if !begin_relocated {
                        diag.message(
                            cat | Category::IMPACT_2 | Category::RELOC,
                            &entry_wh,
                            format_args!(
                                "end of address range is relocated, but the beginning wasn't."
                            ),
                        );
                    } else {
                        check_range_relocations(
                            cat,
                            &entry_wh,
                            file,
                            begin_shndx,
                            end_shndx,
                            "begin and end address",
                            diag,
                        );
                    }
                }
            }
            None => {
                if begin_relocated {
                    diag.message(
                        cat | Category::IMPACT_2 | Category::RELOC,
                        &entry_wh,
                        format_args!(
                            "end of address range is not relocated, but the beginning was."
                        ),
                    );
                }
            }
        }

        let done =
            begin_addr == 0 && end_addr == 0 && !begin_relocated && !end_relocated;

        if !done && begin_addr != escape {
            if base.is_none() {
                diag.error(
                    &entry_wh,
                    format_args!(
                        "address range with no base address set: {}.",
                        range_fmt(begin_addr, end_addr)
                    ),
                );
                // Not something that derails the high-level checks, carry
                // on.
            }

            if end_addr < begin_addr {
                diag.message(
                    cat | Category::ERROR,
                    &entry_wh,
                    format_args!(
                        "has negative range {}.",
                        range_fmt(begin_addr, end_addr)
                    ),
                );
            } else if begin_addr == end_addr {
                // 2.6.6: an entry whose beginning and ending addresses are
                // equal has no effect.
                diag.message(
                    cat | Category::ACC_BLOAT | Category::IMPACT_3,
                    &entry_wh,
                    format_args!("entry covers no range."),
                );
            } else if let Some(base_addr) = base {
                let address = begin_addr + base_addr;
                let length = end_addr - begin_addr;

                // Live entries of one list must not overlap in the address
                // space either.
                if entry_addresses.is_overlap(address, length) {
                    diag.error(&entry_wh, format_args!("range definitions overlap."));
                    retval = false;
                }
                entry_addresses.add(address, length);

                // Skip coverage analysis if we have errors.
                if retval {
                    if let Some(map) = coverage_map.as_deref_mut() {
                        map.add(file, address, length, &entry_wh, cat, diag);
                    }
                    if let Some(cu_cov) = cu_cov.as_deref_mut() {
                        cu_cov.cov.add(address, length);
                    }
                }
            }

            if contains_locations {
                // Location expression length.
                if have_overlap(coverage, ctx.offset(), 2, &mut overlap) {
                    retval = false;
                }
                let len = match ctx.read_u16() {
                    Some(len) => u64::from(len),
                    None => {
                        diag.error(
                            &entry_wh,
                            format_args!("can't read length of location expression."),
                        );
                        return false;
                    }
                };

                // The expression itself.
                let expr_start = ctx.offset();
                if !check_location_expression(
                    file,
                    &ctx,
                    expr_start,
                    reloc,
                    len,
                    &entry_wh,
                    addr_64,
                    diag,
                ) {
                    return false;
                }
                if have_overlap(coverage, expr_start, len, &mut overlap) {
                    retval = false;
                }

                if ctx.skip(len).is_none() {
                    diag.error(
                        &entry_wh,
                        format_args!("not enough data for location expression."),
                    );
                    return false;
                }
            }
        } else if !done {
            // Base address selection.
            if Some(end_addr) == base {
                diag.message(
                    cat | Category::ACC_BLOAT | Category::IMPACT_3,
                    &entry_wh,
                    format_args!(
                        "base address selection doesn't change base address ({end_addr:#x})."
                    ),
                );
            } else {
                base = Some(end_addr);
            }
        }

        coverage.add(entry_off, ctx.offset() - entry_off);
        if done {
            break;
        }
    }

    retval
}

/// Checks the structure of `.debug_loc` or `.debug_ranges` against the CU
/// table. For `.debug_ranges`, live intervals are projected into `cu_cov`
/// so the aranges comparison can use them.
pub fn check_loc_or_range(
    file: &ElfFile<'_>,
    sec: &ElfSection<'_>,
    cus: &[Cu],
    mut cu_cov: Option<&mut CuCoverage>,
    diag: &Diagnostics,
) -> bool {
    let sec_id = match sec.id {
        Some(id @ (SectionId::Loc | SectionId::Ranges)) => id,
        _ => return false,
    };
    let data = match sec.data {
        Some(data) => data,
        None => return false,
    };
    if cus.is_empty() {
        return false;
    }

    let cat = if sec_id == SectionId::Loc {
        Category::LOC
    } else {
        Category::RANGES
    };

    let mut retval = true;

    let mut coverage_map = if DO_RANGE_COVERAGE && sec_id == SectionId::Ranges {
        Some(CoverageMap::new(file, sec_id == SectionId::Loc))
    } else {
        None
    };

    // Overlap discovery.
    let mut coverage = Coverage::new();

    // Relocation checking below assumes that references are processed in
    // monotonically increasing order, which their distribution over CUs
    // does not guarantee. Merge and sort them first.
    let mut refs: Vec<(&Ref, &Cu)> = Vec::new();
    for cu in cus {
        let rec = if sec_id == SectionId::Loc {
            &cu.loc_refs
        } else {
            &cu.range_refs
        };
        refs.extend(rec.iter().map(|r| (r, cu)));
    }
    refs.sort_by_key(|(r, _)| r.addr);

    let mut last_off: Option<u64> = None;
    for (r, cu) in refs {
        if let Some(last) = last_off {
            if r.addr == last {
                continue;
            }
            if let Some(reloc) = sec.rel.as_ref() {
                reloc.skip(r.addr, &Where::new(sec_id), SkipReport::Unref, diag);
            }
        }

        if !check_loc_or_range_ref(
            file,
            data,
            cu,
            sec,
            sec_id,
            &mut coverage,
            coverage_map.as_mut(),
            cu_cov.as_deref_mut(),
            r.addr,
            &r.who,
            cat,
            diag,
        ) {
            retval = false;
        }
        last_off = Some(r.addr);
    }

    if retval {
        if let Some(reloc) = sec.rel.as_ref() {
            reloc.skip_rest(sec_id, diag);
        }

        // All CUs share one address size by now; take the first one's.
        let align = u64::from(cus[0].address_size);
        coverage.find_holes(0, data.len() as u64, |start, length| {
            report_hole(diag, sec_id, cat, data, align, start, length)
        });

        if let Some(map) = &coverage_map {
            map.find_holes(file, sec_id, cat, diag);
        }
    }

    if retval {
        if let Some(cu_cov) = cu_cov {
            // Only once the walk succeeded, so that the aranges coverage
            // analysis isn't done against incomplete data.
            cu_cov.need_ranges = false;
        }
    }

    retval
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Criterion, Term};
    use goblin::elf::header::{EM_X86_64, ET_DYN};
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

    impl SharedSink {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
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

    fn file() -> ElfFile<'static> {
        ElfFile::empty(true, false, ET_DYN, EM_X86_64)
    }

    #[test]
    fn test_locexpr_operand_table() {
        // DW_OP_addr takes an address, DW_OP_bregx a pair, DW_OP_nop
        // nothing, and vendor space is unknown.
        assert_eq!(locexpr_operands(0x03), Some((Operand::Addr, Operand::None)));
        assert_eq!(locexpr_operands(0x92), Some((Operand::Udata, Operand::Sdata)));
        assert_eq!(locexpr_operands(0x96), Some((Operand::None, Operand::None)));
        assert_eq!(locexpr_operands(0xe0), None);
    }

    #[test]
    fn test_expression_skip_zero_is_bloat() {
        let (diag, sink) = capture();
        let file = file();
        // DW_OP_skip 0
        let data = [0x2f, 0x00, 0x00];
        let ctx = ReadCtx::new(&data, true);
        let wh = Where::new(SectionId::Loc);

        assert!(check_location_expression(
            &file, &ctx, 0, None, 3, &wh, false, &diag
        ));
        assert!(sink.contents().contains("DW_OP_skip with skip 0."));
    }

    #[test]
    fn test_expression_branch_out_of_bounds() {
        let (diag, sink) = capture();
        let file = file();
        // DW_OP_skip +16 in a 3-byte expression.
        let data = [0x2f, 0x10, 0x00];
        let ctx = ReadCtx::new(&data, true);
        let wh = Where::new(SectionId::Loc);

        check_location_expression(&file, &ctx, 0, None, 3, &wh, false, &diag);
        assert!(sink
            .contents()
            .contains("DW_OP_skip branches out of location expression."));
    }

    #[test]
    fn test_expression_branch_to_mid_opcode() {
        let (diag, sink) = capture();
        let file = file();
        // DW_OP_skip recording a target of 0x2, while opcodes start at
        // offsets 0, 3 and 5. Layout: skip (3 bytes), const1u (2), nop.
        let data = [0x2f, 0x02, 0x00, 0x08, 0x2a, 0x96];
        let ctx = ReadCtx::new(&data, true);
        let wh = Where::new(SectionId::Loc);

        check_location_expression(&file, &ctx, 0, None, 6, &wh, false, &diag);
        assert!(sink
            .contents()
            .contains("unresolved reference to opcode at 0x2."));
    }

    #[test]
    fn test_expression_const8_on_32bit() {
        let (diag, sink) = capture();
        let file = file();
        let mut data = vec![0x0e]; // DW_OP_const8u
        data.extend_from_slice(&[0u8; 8]);
        let ctx = ReadCtx::new(&data, true);
        let wh = Where::new(SectionId::Loc);

        check_location_expression(&file, &ctx, 0, None, 9, &wh, false, &diag);
        assert!(sink.contents().contains("DW_OP_const8u on 32-bit machine."));
    }

    #[test]
    fn test_unknown_opcode() {
        let (diag, sink) = capture();
        let file = file();
        let data = [0xe0];
        let ctx = ReadCtx::new(&data, true);
        let wh = Where::new(SectionId::Loc);

        check_location_expression(&file, &ctx, 0, None, 1, &wh, false, &diag);
        assert!(sink.contents().contains("can't decode opcode"));
    }
}
