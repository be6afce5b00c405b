//! Loader for `.debug_info`.
//!
//! Walks the chain of compilation units, and within each CU the DIE tree,
//! decoding every attribute by the form its abbreviation declares. Along the
//! way it records the section offset of every DIE, every DIE reference,
//! and every pointer into `.debug_loc` / `.debug_ranges` / `.debug_line`,
//! so the dependent passes can resolve them. CU-level `low_pc`/`high_pc`
//! pairs accumulate into the per-file coverage used by the aranges
//! comparison.

use std::cell::Cell;

use gimli::constants as dw;

use crate::abbrev::{
    check_sibling_form, form_valid, is_location_attrib, AbbrevTable, SiblingForm,
};
use crate::coverage::{report_hole, AddrRecord, Coverage, Ref};
use crate::elf::{ElfFile, ElfSection};
use crate::locranges::check_location_expression;
use crate::messages::{
    checked_sleb128, checked_uleb128, Category, Diagnostics, SectionId, Where,
};
use crate::readctx::ReadCtx;
use crate::reloc::{next_and_apply, RelocData, RelocTarget, SkipReport};

pub(crate) const DWARF3_LENGTH_MIN_ESCAPE_CODE: u32 = 0xffff_fff0;
pub(crate) const DWARF3_LENGTH_64_BIT: u32 = 0xffff_ffff;

/// One compilation unit record, immutable once the info pass finishes.
#[derive(Debug)]
pub struct Cu {
    /// Section offset of the CU header.
    pub offset: u64,
    /// Section offset of the CU DIE.
    pub cudie_offset: u64,
    /// Length including the length field itself.
    pub length: u64,
    /// Address size in bytes on the target machine.
    pub address_size: u8,
    /// `DW_AT_low_pc` value of the CU DIE, if present.
    pub low_pc: Option<u64>,
    /// Section offsets where DIEs begin in this CU.
    pub die_addrs: AddrRecord,
    /// DIE references into other CUs from this CU.
    pub die_refs: Vec<Ref>,
    /// References into `.debug_loc` from this CU.
    pub loc_refs: Vec<Ref>,
    /// References into `.debug_ranges` from this CU.
    pub range_refs: Vec<Ref>,
    /// References into `.debug_line` from this CU.
    pub line_refs: Vec<Ref>,
    pub wh: Where,
    /// Whether we saw an arange table pointing at this CU.
    pub has_arange: Cell<bool>,
    /// Likewise for pubnames and pubtypes.
    pub has_pubnames: Cell<bool>,
    pub has_pubtypes: Cell<bool>,
}

impl Cu {
    fn new(offset: u64, wh: Where) -> Self {
        Cu {
            offset,
            cudie_offset: 0,
            length: 0,
            address_size: 0,
            low_pc: None,
            die_addrs: AddrRecord::new(),
            die_refs: Vec::new(),
            loc_refs: Vec::new(),
            range_refs: Vec::new(),
            line_refs: Vec::new(),
            wh,
            has_arange: Cell::new(false),
            has_pubnames: Cell::new(false),
            has_pubtypes: Cell::new(false),
        }
    }
}

/// Finds the CU whose header sits at `offset`.
pub fn find_cu(cus: &[Cu], offset: u64) -> Option<&Cu> {
    cus.iter().find(|cu| cu.offset == offset)
}

/// Address space covered by CUs, either via `low_pc`/`high_pc` pairs or via
/// `DW_AT_ranges` references.
#[derive(Debug, Default)]
pub struct CuCoverage {
    pub cov: Coverage,
    /// Set while some CU relies on `DW_AT_ranges` for its coverage; cleared
    /// once the ranges pass has projected those into `cov`.
    pub need_ranges: bool,
}

/// Decodes the initial-length escape: a 32-bit length of `0xffffffff`
/// switches to 64-bit DWARF with an 8-byte length following.
pub(crate) fn read_size_extra(
    ctx: &mut ReadCtx<'_>,
    size32: u32,
    wh: &Where,
    diag: &Diagnostics,
) -> Option<(u64, bool)> {
    if size32 == DWARF3_LENGTH_64_BIT {
        match ctx.read_u64() {
            Some(size) => Some((size, true)),
            None => {
                diag.error(wh, format_args!("can't read 64bit CU length."));
                None
            }
        }
    } else if size32 >= DWARF3_LENGTH_MIN_ESCAPE_CODE {
        diag.error(
            wh,
            format_args!("unrecognized CU length escape value: {size32:#x}."),
        );
        None
    } else {
        Some((u64::from(size32), false))
    }
}

/// If everything from the cursor to the end of the window is zero, reports
/// it as padding and consumes it. Otherwise the cursor is left untouched.
pub(crate) fn check_zero_padding(
    ctx: &mut ReadCtx<'_>,
    cat: Category,
    wh: &Where,
    diag: &Diagnostics,
) -> bool {
    let start = ctx.offset();
    let data = ctx.data();
    if data[start as usize..].iter().any(|&b| b != 0) {
        return false;
    }
    let end = ctx.len();
    ctx.seek(end).unwrap_or_default();
    diag.padding_zero(cat, wh, start, end);
    true
}

pub(crate) fn supported_version(
    version: u16,
    supported: &[u16],
    wh: &Where,
    diag: &Diagnostics,
) -> bool {
    if supported.contains(&version) {
        return true;
    }
    diag.error(wh, format_args!("unsupported version {version}."));
    false
}

/// Reports `low_pc`/`high_pc` style endpoint pairs whose relocations target
/// different sections.
pub(crate) fn check_range_relocations(
    cat: Category,
    wh: &Where,
    file: &ElfFile<'_>,
    begin_shndx: Option<usize>,
    end_shndx: Option<usize>,
    description: &str,
    diag: &Diagnostics,
) {
    let (begin, end) = match (begin_shndx, end_shndx) {
        (Some(b), Some(e)) => (b, e),
        _ => return,
    };
    if begin == end {
        return;
    }
    let name = |i: usize| {
        file.sections
            .get(i)
            .map(|sec| sec.name.as_str())
            .unwrap_or("<bad section>")
    };
    diag.message(
        cat | Category::IMPACT_2 | Category::RELOC,
        wh,
        format_args!(
            "{description} relocated against different sections ({} and {}).",
            name(begin),
            name(end)
        ),
    );
}

/// What a `data4`/`data8` attribute value points at, as decided by the
/// attribute name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PtrCheck {
    Nothing,
    Loc,
    Line,
    Range,
}

impl PtrCheck {
    fn category(self) -> Category {
        match self {
            PtrCheck::Nothing => Category::OTHER,
            PtrCheck::Loc => Category::LOC,
            PtrCheck::Line => Category::LINE,
            PtrCheck::Range => Category::RANGES,
        }
    }
}

/// What an attribute's relocation is expected to target.
fn reloc_target(form: dw::DwForm, at: dw::DwAt) -> RelocTarget {
    if form == dw::DW_FORM_strp {
        return RelocTarget::Section(SectionId::Str);
    }

    if form == dw::DW_FORM_addr {
        if at == dw::DW_AT_low_pc || at == dw::DW_AT_high_pc || at == dw::DW_AT_entry_pc {
            return RelocTarget::Exec;
        }
        if at == dw::DW_AT_const_value {
            // Appears in some kernel modules. Not allowed by the standard,
            // but that is for the high-level checks to flag.
            return RelocTarget::Address;
        }
    }

    if form == dw::DW_FORM_ref_addr {
        return RelocTarget::Section(SectionId::Info);
    }

    if form == dw::DW_FORM_data1 || form == dw::DW_FORM_data2 {
        // Technically legal, but never used in DWARF sections; have them
        // flagged.
        return RelocTarget::Invalid;
    }

    if form == dw::DW_FORM_data4 || form == dw::DW_FORM_data8 {
        if at == dw::DW_AT_stmt_list {
            return RelocTarget::Section(SectionId::Line);
        }
        if at == dw::DW_AT_location
            || at == dw::DW_AT_string_length
            || at == dw::DW_AT_return_addr
            || at == dw::DW_AT_data_member_location
            || at == dw::DW_AT_frame_base
            || at == dw::DW_AT_segment
            || at == dw::DW_AT_static_link
            || at == dw::DW_AT_use_location
            || at == dw::DW_AT_vtable_elem_location
        {
            return RelocTarget::Section(SectionId::Loc);
        }
        if at == dw::DW_AT_macro_info {
            return RelocTarget::Section(SectionId::Mac);
        }
        if at == dw::DW_AT_ranges {
            return RelocTarget::Section(SectionId::Ranges);
        }
    }

    if form == dw::DW_FORM_string
        || form == dw::DW_FORM_ref1
        || form == dw::DW_FORM_ref2
        || form == dw::DW_FORM_ref4
    {
        // Shouldn't be relocated.
        return RelocTarget::Invalid;
    }

    tracing::debug!(%form, %at, "no relocation target rule for this attribute");
    RelocTarget::Value
}

struct DieWalk<'a, 'data> {
    file: &'a ElfFile<'data>,
    abbrevs: &'a AbbrevTable,
    strings: Option<&'data [u8]>,
    dwarf_64: bool,
    addr_64: bool,
    reloc: Option<&'a RelocData>,
    diag: &'a Diagnostics,
}

impl<'a, 'data> DieWalk<'a, 'data> {
    fn record_ref(
        &self,
        cu: &mut Cu,
        local_die_refs: &mut Vec<Ref>,
        cu_size: u64,
        addr: u64,
        wh: &Where,
        local: bool,
    ) {
        if local {
            if addr > cu_size {
                self.diag.error(
                    wh,
                    format_args!("invalid reference outside the CU: {addr:#x}."),
                );
                return;
            }
            // A CU-local reference; add the CU offset to turn it into a
            // section offset.
            local_die_refs.push(Ref {
                addr: addr + cu.offset,
                who: wh.clone(),
            });
        } else {
            cu.die_refs.push(Ref {
                addr,
                who: wh.clone(),
            });
        }
    }

    fn check_ptr(
        &self,
        cu: &mut Cu,
        cu_cov: &mut CuCoverage,
        check: PtrCheck,
        value: u64,
        wh: &Where,
    ) {
        if check == PtrCheck::Range && value % u64::from(cu.address_size) != 0 {
            self.diag.message(
                Category::RANGES | Category::IMPACT_2,
                wh,
                format_args!("rangeptr value {value:#x} not aligned to CU address size."),
            );
        }

        let record = match check {
            PtrCheck::Range => {
                cu_cov.need_ranges = true;
                &mut cu.range_refs
            }
            PtrCheck::Line => &mut cu.line_refs,
            PtrCheck::Loc => &mut cu.loc_refs,
            PtrCheck::Nothing => return,
        };
        record.push(Ref {
            addr: value,
            who: wh.clone(),
        });
    }

    /// Walks one sibling chain. `Ok(true)` when at least one DIE was read,
    /// `Ok(false)` for a chain consisting only of the terminating zero
    /// entry, `None` on a fatal error.
    #[allow(clippy::too_many_arguments)]
    fn read_die_chain(
        &self,
        ctx: &mut ReadCtx<'data>,
        cu: &mut Cu,
        local_die_refs: &mut Vec<Ref>,
        strings_coverage: &mut Option<Coverage>,
        cu_cov: &mut CuCoverage,
    ) -> Option<bool> {
        let mut got_die = false;
        let mut sibling_addr: u64 = 0;
        let mut prev_abbrev: Option<&crate::abbrev::Abbrev> = None;
        let mut wh = cu.wh.clone();
        let cu_size = ctx.len();

        while !ctx.eof() {
            wh = cu.wh.clone();
            let die_off = ctx.offset();
            // Shift the reported DIE offset by the CU offset, the way
            // readelf reports DIEs.
            wh.reset_2(die_off + cu.offset);

            let abbr_code = checked_uleb128(ctx, self.diag, &wh, "abbrev code")?;

            // Check the sibling value advertised last time through the loop.
            if sibling_addr != 0 {
                if sibling_addr != die_off {
                    self.diag.error(
                        &wh,
                        format_args!(
                            "This DIE should have had its sibling at {sibling_addr:#x}, \
                             but it's at {die_off:#x} instead."
                        ),
                    );
                } else if abbr_code == 0 {
                    self.diag.error(
                        &wh,
                        format_args!(
                            "is the last sibling in chain, but has a DW_AT_sibling attribute."
                        ),
                    );
                }
                sibling_addr = 0;
            } else if let Some(prev) = prev_abbrev {
                // Even with children, the last DIE in a chain can't carry a
                // sibling attribute, which is why this can't be checked
                // during abbrev loading.
                if prev.has_children {
                    self.diag.message(
                        Category::DIE_REL | Category::ACC_SUBOPTIMAL | Category::IMPACT_4,
                        &wh,
                        format_args!("This DIE had children, but no DW_AT_sibling attribute."),
                    );
                }
            }

            // The chain ended.
            if abbr_code == 0 {
                return Some(got_die);
            }
            if ctx.eof() {
                self.diag.error(
                    &wh,
                    format_args!("DIE chain not terminated with DIE with zero abbrev code."),
                );
                break;
            }

            got_die = true;

            let abbrev = match self.abbrevs.find(abbr_code) {
                Some(abbrev) => abbrev,
                None => {
                    self.diag.error(
                        &wh,
                        format_args!(
                            "abbrev section at {:#x} doesn't contain code {abbr_code}.",
                            self.abbrevs.offset
                        ),
                    );
                    return None;
                }
            };
            abbrev.used.set(true);

            cu.die_addrs.add(cu.offset + die_off);

            let mut low_pc: Option<u64> = None;
            let mut high_pc: Option<u64> = None;
            let mut low_pc_relocated = false;
            let mut high_pc_relocated = false;
            let mut low_pc_shndx: Option<usize> = None;
            let mut high_pc_shndx: Option<usize> = None;

            for attrib in &abbrev.attribs {
                wh.set_context(Some(&attrib.wh));

                let at = dw::DwAt(attrib.name);
                let mut form = dw::DwForm(u16::from(attrib.form));
                let indirect = form == dw::DW_FORM_indirect;
                if indirect {
                    let value =
                        checked_uleb128(ctx, self.diag, &wh, "indirect attribute form")?;
                    if !form_valid(value) {
                        self.diag.error(
                            &wh,
                            format_args!("invalid indirect form {value:#x}."),
                        );
                        return None;
                    }
                    form = dw::DwForm(value as u16);

                    if at == dw::DW_AT_sibling {
                        match check_sibling_form(form) {
                            SiblingForm::Ok => {}
                            SiblingForm::RefAddr => self.diag.message(
                                Category::DIE_REL | Category::IMPACT_2,
                                &wh,
                                format_args!(
                                    "DW_AT_sibling attribute with (indirect) form \
                                     DW_FORM_ref_addr."
                                ),
                            ),
                            SiblingForm::NonRef => self.diag.error(
                                &wh,
                                format_args!(
                                    "DW_AT_sibling attribute with non-reference \
                                     (indirect) form \"{form}\"."
                                ),
                            ),
                        }
                    }
                }

                let mut check = PtrCheck::Nothing;
                if is_location_attrib(at) {
                    if form == dw::DW_FORM_data4 || form == dw::DW_FORM_data8 {
                        if form == dw::DW_FORM_data8 && !self.dwarf_64 {
                            self.diag.error(
                                &wh,
                                format_args!(
                                    "location attribute with form \"{form}\" in 32-bit CU."
                                ),
                            );
                        }
                        check = PtrCheck::Loc;
                    } else if form != dw::DW_FORM_block1
                        && form != dw::DW_FORM_block2
                        && form != dw::DW_FORM_block4
                        && form != dw::DW_FORM_block
                        && indirect
                    {
                        // For a direct form the diagnostic was already given
                        // during abbrev loading.
                        self.diag.error(
                            &wh,
                            format_args!(
                                "location attribute with invalid (indirect) form \"{form}\"."
                            ),
                        );
                    }
                } else if at == dw::DW_AT_ranges || at == dw::DW_AT_stmt_list {
                    if form == dw::DW_FORM_data4 || form == dw::DW_FORM_data8 {
                        if form == dw::DW_FORM_data8 && !self.dwarf_64 {
                            self.diag.error(
                                &wh,
                                format_args!("{at} with form DW_FORM_data8 in 32-bit CU."),
                            );
                        }
                        check = if at == dw::DW_AT_ranges {
                            PtrCheck::Range
                        } else {
                            PtrCheck::Line
                        };
                    } else if indirect {
                        self.diag.error(
                            &wh,
                            format_args!("{at} with invalid (indirect) form \"{form}\"."),
                        );
                    }
                }

                let ctx_offset = ctx.offset() + cu.offset;
                let type_is_rel = self.file.is_rel();

                if form == dw::DW_FORM_strp {
                    let mut addr = match ctx.read_offset(self.dwarf_64) {
                        Some(addr) => addr,
                        None => {
                            self.diag
                                .error(&wh, format_args!("can't read attribute value."));
                            return None;
                        }
                    };

                    let applied = next_and_apply(
                        self.reloc,
                        self.file,
                        ctx_offset,
                        if self.dwarf_64 { 8 } else { 4 },
                        &mut addr,
                        &wh,
                        RelocTarget::Section(SectionId::Str),
                        self.diag,
                    );
                    if applied.is_none() && type_is_rel {
                        self.diag.message(
                            Category::IMPACT_2
                                | Category::DIE_OTHER
                                | Category::RELOC
                                | Category::STRINGS,
                            &wh,
                            format_args!("DW_FORM_strp seems to lack a relocation."),
                        );
                    }

                    match self.strings {
                        None => self.diag.error(
                            &wh,
                            format_args!("strp attribute, but no .debug_str section."),
                        ),
                        Some(strings) if addr >= strings.len() as u64 => self.diag.error(
                            &wh,
                            format_args!("Invalid offset outside .debug_str: {addr:#x}."),
                        ),
                        Some(strings) => {
                            // Record the used part of .debug_str.
                            if let Some(coverage) = strings_coverage {
                                let tail = &strings[addr as usize..];
                                let len = tail
                                    .iter()
                                    .position(|&b| b == 0)
                                    .map(|n| n + 1)
                                    .unwrap_or(tail.len());
                                coverage.add(addr, len as u64);
                            }
                        }
                    }
                } else if form == dw::DW_FORM_string {
                    if ctx.read_str().is_none() {
                        self.diag
                            .error(&wh, format_args!("can't read attribute value."));
                        return None;
                    }
                } else if form == dw::DW_FORM_addr || form == dw::DW_FORM_ref_addr {
                    let mut addr = match ctx.read_offset(self.addr_64) {
                        Some(addr) => addr,
                        None => {
                            self.diag
                                .error(&wh, format_args!("can't read attribute value."));
                            return None;
                        }
                    };

                    let applied = next_and_apply(
                        self.reloc,
                        self.file,
                        ctx_offset,
                        if self.addr_64 { 8 } else { 4 },
                        &mut addr,
                        &wh,
                        reloc_target(form, at),
                        self.diag,
                    );
                    match applied {
                        Some(shndx) => {
                            if at == dw::DW_AT_low_pc {
                                low_pc_relocated = true;
                                low_pc_shndx = shndx;
                            } else if at == dw::DW_AT_high_pc {
                                high_pc_relocated = true;
                                high_pc_shndx = shndx;
                            }
                        }
                        None => {
                            // In non-REL files neither addr nor ref_addr
                            // needs a relocation; ref_addr still gets its
                            // target recorded below.
                            if type_is_rel && addr != 0 {
                                self.diag.message(
                                    Category::IMPACT_2 | Category::DIE_REL | Category::RELOC,
                                    &wh,
                                    format_args!("{form} seems to lack a relocation."),
                                );
                            }
                        }
                    }

                    if at == dw::DW_AT_low_pc {
                        low_pc = Some(addr);
                    } else if at == dw::DW_AT_high_pc {
                        high_pc = Some(addr);
                    }

                    if form == dw::DW_FORM_ref_addr {
                        self.record_ref(cu, local_die_refs, cu_size, addr, &wh, false);
                    }

                    if abbrev.tag == dw::DW_TAG_compile_unit.0
                        || abbrev.tag == dw::DW_TAG_partial_unit.0
                    {
                        if at == dw::DW_AT_low_pc {
                            cu.low_pc = Some(addr);
                        }
                        if let (Some(low), Some(high)) = (low_pc, high_pc) {
                            cu_cov.cov.add(low, high.saturating_sub(low));
                        }
                    }
                } else if form == dw::DW_FORM_udata || form == dw::DW_FORM_ref_udata {
                    let value = checked_uleb128(ctx, self.diag, &wh, "attribute value")?;
                    if at == dw::DW_AT_sibling {
                        sibling_addr = value;
                    } else if form == dw::DW_FORM_ref_udata {
                        self.record_ref(cu, local_die_refs, cu_size, value, &wh, true);
                    }
                } else if form == dw::DW_FORM_flag
                    || form == dw::DW_FORM_data1
                    || form == dw::DW_FORM_ref1
                {
                    // Neither of these is relocated.
                    let value = match ctx.read_u8() {
                        Some(value) => u64::from(value),
                        None => {
                            self.diag
                                .error(&wh, format_args!("can't read attribute value."));
                            return None;
                        }
                    };
                    if at == dw::DW_AT_sibling {
                        sibling_addr = value;
                    } else if form == dw::DW_FORM_ref1 {
                        self.record_ref(cu, local_die_refs, cu_size, value, &wh, true);
                    }
                } else if form == dw::DW_FORM_data2 || form == dw::DW_FORM_ref2 {
                    let value = match ctx.read_u16() {
                        Some(value) => u64::from(value),
                        None => {
                            self.diag
                                .error(&wh, format_args!("can't read attribute value."));
                            return None;
                        }
                    };
                    if at == dw::DW_AT_sibling {
                        sibling_addr = value;
                    } else if form == dw::DW_FORM_ref2 {
                        self.record_ref(cu, local_die_refs, cu_size, value, &wh, true);
                    }
                } else if form == dw::DW_FORM_data4
                    || form == dw::DW_FORM_ref4
                    || form == dw::DW_FORM_data8
                    || form == dw::DW_FORM_ref8
                {
                    let wide = form == dw::DW_FORM_data8 || form == dw::DW_FORM_ref8;
                    let mut value = match if wide {
                        ctx.read_u64()
                    } else {
                        ctx.read_u32().map(u64::from)
                    } {
                        Some(value) => value,
                        None => {
                            self.diag
                                .error(&wh, format_args!("can't read attribute value."));
                            return None;
                        }
                    };

                    // The reference forms are never relocated.
                    if form == dw::DW_FORM_data4 || form == dw::DW_FORM_data8 {
                        let applied = next_and_apply(
                            self.reloc,
                            self.file,
                            ctx_offset,
                            if wide { 8 } else { 4 },
                            &mut value,
                            &wh,
                            reloc_target(form, at),
                            self.diag,
                        );
                        if applied.is_none() && type_is_rel && check != PtrCheck::Nothing {
                            self.diag.message(
                                Category::IMPACT_2
                                    | Category::DIE_OTHER
                                    | Category::RELOC
                                    | check.category(),
                                &wh,
                                format_args!("{form} seems to lack a relocation."),
                            );
                        }
                    }

                    if at == dw::DW_AT_sibling {
                        sibling_addr = value;
                    } else if check != PtrCheck::Nothing {
                        self.check_ptr(cu, cu_cov, check, value, &wh);
                    } else if form == dw::DW_FORM_ref4 || form == dw::DW_FORM_ref8 {
                        self.record_ref(cu, local_die_refs, cu_size, value, &wh, true);
                    }
                } else if form == dw::DW_FORM_sdata {
                    checked_sleb128(ctx, self.diag, &wh, "attribute value")?;
                } else if form == dw::DW_FORM_block
                    || form == dw::DW_FORM_block1
                    || form == dw::DW_FORM_block2
                    || form == dw::DW_FORM_block4
                {
                    let length = if form == dw::DW_FORM_block {
                        checked_uleb128(ctx, self.diag, &wh, "attribute value")?
                    } else {
                        let width = if form == dw::DW_FORM_block1 {
                            1
                        } else if form == dw::DW_FORM_block2 {
                            2
                        } else {
                            4
                        };
                        match ctx.read_var(width) {
                            Some(length) => length,
                            None => {
                                self.diag
                                    .error(&wh, format_args!("can't read attribute value."));
                                return None;
                            }
                        }
                    };

                    if is_location_attrib(at) {
                        let expr_start = cu.offset + ctx.offset();
                        if !check_location_expression(
                            self.file,
                            ctx,
                            expr_start,
                            self.reloc,
                            length,
                            &wh,
                            self.addr_64,
                            self.diag,
                        ) {
                            return None;
                        }
                    } else if let Some(reloc) = self.reloc {
                        reloc.skip(
                            cu.offset + ctx.offset() + length,
                            &wh,
                            SkipReport::Mismatched,
                            self.diag,
                        );
                    }

                    if ctx.skip(length).is_none() {
                        self.diag
                            .error(&wh, format_args!("can't read attribute value."));
                        return None;
                    }
                } else if form == dw::DW_FORM_indirect {
                    self.diag
                        .error(&wh, format_args!("indirect form is again indirect."));
                    return None;
                } else {
                    self.diag.error(
                        &wh,
                        format_args!("internal error: unhandled form {:#x}.", form.0),
                    );
                }
            }
            wh.set_context(None);

            if let (Some(_), Some(_)) = (low_pc, high_pc) {
                if high_pc_relocated != low_pc_relocated {
                    self.diag.message(
                        Category::DIE_OTHER | Category::IMPACT_2 | Category::RELOC,
                        &wh,
                        format_args!(
                            "only one of DW_AT_low_pc and DW_AT_high_pc is relocated."
                        ),
                    );
                } else {
                    check_range_relocations(
                        Category::DIE_OTHER,
                        &wh,
                        self.file,
                        low_pc_shndx,
                        high_pc_shndx,
                        "DW_AT_low_pc and DW_AT_high_pc",
                        self.diag,
                    );
                }
            }

            wh.set_context(Some(&abbrev.wh));

            if abbrev.has_children {
                let got =
                    self.read_die_chain(ctx, cu, local_die_refs, strings_coverage, cu_cov)?;
                if !got {
                    self.diag.message(
                        Category::IMPACT_3 | Category::ACC_SUBOPTIMAL | Category::DIE_REL,
                        &wh,
                        format_args!("abbrev has_children, but the chain was empty."),
                    );
                }
            }

            prev_abbrev = Some(abbrev);
        }

        if sibling_addr != 0 {
            self.diag.error(
                &wh,
                format_args!(
                    "this DIE should have had its sibling at {sibling_addr:#x}, \
                     but the DIE chain ended."
                ),
            );
        }

        Some(got_die)
    }
}

/// Checks one CU after its length field. `ctx` covers the whole CU
/// including the length field, positioned just past it.
#[allow(clippy::too_many_arguments)]
fn check_cu<'data>(
    file: &ElfFile<'data>,
    ctx: &mut ReadCtx<'data>,
    cu: &mut Cu,
    abbrev_tables: &[AbbrevTable],
    strings: Option<&'data [u8]>,
    dwarf_64: bool,
    strings_coverage: &mut Option<Coverage>,
    reloc: Option<&RelocData>,
    cu_cov: &mut CuCoverage,
    diag: &Diagnostics,
) -> bool {
    // Version.
    let version = match ctx.read_u16() {
        Some(version) => version,
        None => {
            diag.error(&cu.wh, format_args!("can't read version."));
            return false;
        }
    };
    if !supported_version(version, &[2, 3], &cu.wh, diag) {
        return false;
    }
    if version == 2 && dwarf_64 {
        // A standard violation, but the unit may still be readable; keep
        // going so the high-level checks get their chance.
        diag.error(&cu.wh, format_args!("invalid 64-bit unit in DWARF 2 format."));
    }

    // Abbrev offset.
    let ctx_offset = ctx.offset() + cu.offset;
    let mut abbrev_offset = match ctx.read_offset(dwarf_64) {
        Some(offset) => offset,
        None => {
            diag.error(&cu.wh, format_args!("can't read abbrev offset."));
            return false;
        }
    };

    let applied = next_and_apply(
        reloc,
        file,
        ctx_offset,
        if dwarf_64 { 8 } else { 4 },
        &mut abbrev_offset,
        &cu.wh,
        RelocTarget::Section(SectionId::Abbrev),
        diag,
    );
    if applied.is_none() && file.is_rel() {
        diag.message(
            Category::IMPACT_2 | Category::INFO | Category::RELOC,
            &cu.wh,
            format_args!("abbrev offset seems to lack a relocation."),
        );
    }

    // Address size.
    let address_size = match ctx.read_u8() {
        Some(size) => size,
        None => {
            diag.error(&cu.wh, format_args!("can't read address size."));
            return false;
        }
    };
    if address_size != 4 && address_size != 8 {
        diag.error(
            &cu.wh,
            format_args!("invalid address size: {address_size} (only 4 or 8 allowed)."),
        );
        return false;
    }
    cu.address_size = address_size;

    let abbrevs = match abbrev_tables.iter().find(|t| t.offset == abbrev_offset) {
        Some(table) => table,
        None => {
            diag.error(
                &cu.wh,
                format_args!("couldn't find abbrev section with offset {abbrev_offset:#x}."),
            );
            return false;
        }
    };

    let mut local_die_refs = Vec::new();

    cu.cudie_offset = ctx.offset() + cu.offset;

    let walk = DieWalk {
        file,
        abbrevs,
        strings,
        dwarf_64,
        addr_64: address_size == 8,
        reloc: reloc.filter(|r| !r.entries.is_empty()),
        diag,
    };

    let mut retval = true;
    match walk.read_die_chain(ctx, cu, &mut local_die_refs, strings_coverage, cu_cov) {
        Some(_) => {
            for abbrev in &abbrevs.abbrevs {
                if !abbrev.used.get() {
                    diag.message(
                        Category::IMPACT_3 | Category::ACC_BLOAT | Category::ABBREVS,
                        &cu.wh,
                        format_args!(
                            "abbreviation with code {} is never used.",
                            abbrev.code
                        ),
                    );
                }
            }

            if !check_die_references(cu, &local_die_refs, diag) {
                retval = false;
            }
        }
        None => retval = false,
    }

    retval
}

/// Every CU-local reference must name the start of a DIE in this CU.
fn check_die_references(cu: &Cu, die_refs: &[Ref], diag: &Diagnostics) -> bool {
    let mut retval = true;
    for r in die_refs {
        if !cu.die_addrs.has(r.addr) {
            diag.error(
                &r.who,
                format_args!("unresolved reference to DIE {:#x}.", r.addr),
            );
            retval = false;
        }
    }
    retval
}

/// `ref_addr` references resolve against all CUs; a reference into the
/// referrer's own CU would have been cheaper formed locally.
fn check_global_die_references(cus: &[Cu], diag: &Diagnostics) -> bool {
    let mut retval = true;
    for cu in cus {
        for r in &cu.die_refs {
            let ref_cu = cus.iter().find(|other| other.die_addrs.has(r.addr));
            match ref_cu {
                None => {
                    diag.error(
                        &r.who,
                        format_args!(
                            "unresolved (non-CU-local) reference to DIE {:#x}.",
                            r.addr
                        ),
                    );
                    retval = false;
                }
                Some(other) if std::ptr::eq(other, cu) => {
                    // Valid, but the local form would fit in fewer bytes.
                    diag.message(
                        Category::IMPACT_2 | Category::ACC_SUBOPTIMAL | Category::DIE_REL,
                        &r.who,
                        format_args!("local reference to DIE {:#x} formed as global.", r.addr),
                    );
                }
                Some(_) => {}
            }
        }
    }
    retval
}

/// Checks the whole `.debug_info` section and builds the CU table for the
/// dependent passes. Returns `None` when the section was too broken for the
/// table to be trusted.
pub fn check_info<'data>(
    file: &ElfFile<'data>,
    sec: &ElfSection<'data>,
    abbrev_tables: &[AbbrevTable],
    strings: Option<&'data [u8]>,
    cu_cov: &mut CuCoverage,
    diag: &Diagnostics,
) -> Option<Vec<Cu>> {
    let data = sec.data?;
    let mut ctx = ReadCtx::new(data, file.little_endian);

    let mut cus: Vec<Cu> = Vec::new();
    let mut success = true;

    let mut strings_coverage = match strings {
        Some(_) if diag.accepts(Category::STRINGS) => Some(Coverage::new()),
        _ => None,
    };

    let reloc = sec.rel.as_ref().filter(|r| !r.entries.is_empty());

    while !ctx.eof() {
        let cu_begin = ctx.offset();
        let mut wh = Where::new(SectionId::Info);
        wh.reset_1(cu_begin);

        // Reading the CU header is a bit tricky: this may as well be
        // (superfluous but allowed) zero padding.
        if !ctx.need(4) && check_zero_padding(&mut ctx, Category::INFO | Category::HEADER, &wh, diag)
        {
            break;
        }

        // CU length.
        let size32 = match ctx.read_u32() {
            Some(size) => size,
            None => {
                diag.error(&wh, format_args!("can't read CU length."));
                success = false;
                break;
            }
        };
        if size32 == 0
            && check_zero_padding(&mut ctx, Category::INFO | Category::HEADER, &wh, diag)
        {
            break;
        }

        let (size, dwarf_64) = match read_size_extra(&mut ctx, size32, &wh, diag) {
            Some(res) => res,
            None => {
                success = false;
                break;
            }
        };

        if !ctx.need(size) {
            diag.error(
                &wh,
                format_args!(
                    "section doesn't have enough data to read CU of size {size:#x}."
                ),
            );
            success = false;
            break;
        }

        let cu_end = ctx.offset() + size;
        let mut cu = Cu::new(cu_begin, wh.clone());
        // Length including the length field.
        cu.length = cu_end - cu_begin;

        // version + debug_abbrev_offset + address_size
        let cu_header_size = 2 + if dwarf_64 { 8 } else { 4 } + 1;
        if size < cu_header_size {
            diag.error(
                &wh,
                format_args!("claimed length of {size:#x} doesn't even cover CU header."),
            );
            success = false;
            break;
        }

        // The CU context begins just before the length field so that DIE
        // offsets come out right.
        let mut cu_ctx = match ctx.sub(cu_begin, cu_end) {
            Some(sub) => sub,
            None => {
                diag.error(&wh, format_args!("not enough data for next CU."));
                success = false;
                break;
            }
        };
        cu_ctx.seek(ctx.offset() - cu_begin).unwrap_or_default();

        if !check_cu(
            file,
            &mut cu_ctx,
            &mut cu,
            abbrev_tables,
            strings,
            dwarf_64,
            &mut strings_coverage,
            reloc,
            cu_cov,
            diag,
        ) {
            cus.push(cu);
            success = false;
            break;
        }

        if !cu_ctx.eof() && !check_zero_padding(&mut cu_ctx, Category::INFO, &wh, diag) {
            diag.padding_nonzero(Category::INFO, &wh, ctx.offset(), ctx.offset() + size);
        }

        cus.push(cu);

        if ctx.skip(size).is_none() {
            diag.error(&wh, format_args!("not enough data for next CU."));
            success = false;
            break;
        }
    }

    if success {
        if !ctx.eof() {
            diag.message(
                Category::DIE_OTHER | Category::IMPACT_4,
                &Where::new(SectionId::Info),
                format_args!("CU lengths don't exactly match section contents."),
            );
        } else if let Some(reloc) = reloc {
            // Were all the relocations consumed?
            reloc.skip_rest(SectionId::Info, diag);
        }
    }

    // All CUs must share one address size.
    let mut address_size: u8 = 0;
    let mut first_offset = 0;
    for cu in &cus {
        if address_size == 0 {
            address_size = cu.address_size;
            first_offset = cu.offset;
        } else if address_size != cu.address_size {
            diag.message(
                Category::INFO | Category::ERROR,
                &cu.wh,
                format_args!("has different address size than CU {first_offset:#x}."),
            );
            break;
        }
    }

    let references_sound = check_global_die_references(&cus, diag);

    if let (Some(coverage), Some(strings)) = (&strings_coverage, strings) {
        if success {
            coverage.find_holes(0, strings.len() as u64, |start, length| {
                report_hole(
                    diag,
                    SectionId::Str,
                    Category::STRINGS,
                    strings,
                    0,
                    start,
                    length,
                )
            });
        }
    }

    if !success || !references_sound {
        return None;
    }

    Some(cus)
}
