//! Loader for `.debug_pubnames` and `.debug_pubtypes`.
//!
//! Both sections share one wire shape: a header naming a CU and the length
//! it covers, then `(DIE offset, name)` records terminated by a zero
//! offset. Every record offset must name a DIE of the referenced CU.

use crate::elf::{ElfFile, ElfSection};
use crate::info::{check_zero_padding, find_cu, read_size_extra, supported_version, Cu};
use crate::messages::{Category, Diagnostics, SectionId, Where};
use crate::readctx::ReadCtx;
use crate::reloc::{next_and_apply, RelocTarget};

/// Checks the structure of one pub table section.
pub fn check_pub(file: &ElfFile<'_>, sec: &ElfSection<'_>, cus: &[Cu], diag: &Diagnostics) -> bool {
    let sec_id = match sec.id {
        Some(id @ (SectionId::Pubnames | SectionId::Pubtypes)) => id,
        _ => return false,
    };
    let data = match sec.data {
        Some(data) => data,
        None => return false,
    };
    let mut ctx = ReadCtx::new(data, file.little_endian);
    let reloc = sec.rel.as_ref();

    let mut retval = true;

    while !ctx.eof() {
        let set_begin = ctx.offset();
        let mut wh = Where::new(sec_id);
        wh.reset_1(set_begin);

        // Size.
        let size32 = match ctx.read_u32() {
            Some(size) => size,
            None => {
                diag.error(&wh, format_args!("can't read table length."));
                return false;
            }
        };
        let (size, dwarf_64) = match read_size_extra(&mut ctx, size32, &wh, diag) {
            Some(res) => res,
            None => return false,
        };

        let set_end = ctx.offset() + size;
        let mut sub_ctx = match ctx.sub(set_begin, set_end) {
            Some(sub) => sub,
            None => {
                diag.error(&wh, format_args!("not enough data for next set."));
                return false;
            }
        };
        sub_ctx.seek(ctx.offset() - set_begin).unwrap_or_default();

        loop {
            // Version.
            let version = match sub_ctx.read_u16() {
                Some(version) => version,
                None => {
                    diag.error(&wh, format_args!("can't read set version."));
                    retval = false;
                    break;
                }
            };
            if !supported_version(version, &[2], &wh, diag) {
                retval = false;
                break;
            }

            // Offset of the related CU.
            let ctx_offset = set_begin + sub_ctx.offset();
            let mut cu_offset = match sub_ctx.read_offset(dwarf_64) {
                Some(offset) => offset,
                None => {
                    diag.error(&wh, format_args!("can't read debug info offset."));
                    retval = false;
                    break;
                }
            };

            let applied = next_and_apply(
                reloc,
                file,
                ctx_offset,
                if dwarf_64 { 8 } else { 4 },
                &mut cu_offset,
                &wh,
                RelocTarget::Section(SectionId::Info),
                diag,
            );
            if applied.is_none() && file.is_rel() {
                diag.message(
                    Category::IMPACT_2
                        | Category::PUBTABLES
                        | Category::RELOC
                        | Category::HEADER,
                    &wh,
                    format_args!("debug info offset seems to lack a relocation."),
                );
            }

            let cu = if cus.is_empty() {
                None
            } else {
                let cu = find_cu(cus, cu_offset);
                if cu.is_none() {
                    diag.error(
                        &wh,
                        format_args!("unresolved reference to CU {cu_offset:#x}."),
                    );
                }
                cu
            };

            if let Some(cu) = cu {
                wh.set_context(Some(&cu.wh));
                let has = if sec_id == SectionId::Pubnames {
                    &cu.has_pubnames
                } else {
                    &cu.has_pubtypes
                };
                if has.get() {
                    diag.message(
                        Category::IMPACT_2 | Category::PUBTABLES | Category::HEADER,
                        &wh,
                        format_args!("there has already been section for this CU."),
                    );
                } else {
                    has.set(true);
                }
            }

            // Covered length.
            let cu_len = match sub_ctx.read_offset(dwarf_64) {
                Some(len) => len,
                None => {
                    diag.error(&wh, format_args!("can't read covered length."));
                    retval = false;
                    break;
                }
            };
            if let Some(cu) = cu {
                if cu_len != cu.length {
                    diag.error(
                        &wh,
                        format_args!(
                            "the table covers length {cu_len} but CU has length {}.",
                            cu.length
                        ),
                    );
                    retval = false;
                    break;
                }
            }

            // Records.
            let mut skip = false;
            while !sub_ctx.eof() {
                wh.reset_2(set_begin + sub_ctx.offset());

                let offset = match sub_ctx.read_offset(dwarf_64) {
                    Some(offset) => offset,
                    None => {
                        diag.error(&wh, format_args!("can't read offset field."));
                        retval = false;
                        skip = true;
                        break;
                    }
                };
                if offset == 0 {
                    break;
                }

                if let Some(cu) = cu {
                    if !cu.die_addrs.has(offset + cu.offset) {
                        diag.error(
                            &wh,
                            format_args!("unresolved reference to DIE {offset:#x}."),
                        );
                        retval = false;
                        skip = true;
                        break;
                    }
                }

                // NUL-terminated name.
                if sub_ctx.read_str().is_none() {
                    diag.error(&wh, format_args!("can't read symbol name."));
                    retval = false;
                    skip = true;
                    break;
                }
            }
            if skip {
                break;
            }

            if !sub_ctx.eof()
                && !check_zero_padding(&mut sub_ctx, Category::PUBTABLES, &Where::new(sec_id), diag)
            {
                diag.padding_nonzero(
                    Category::PUBTABLES | Category::ERROR,
                    &Where::new(sec_id),
                    sub_ctx.offset(),
                    sub_ctx.offset() + size,
                );
                retval = false;
            }

            break;
        }

        if ctx.skip(size).is_none() {
            diag.error(&wh, format_args!("not enough data for next set."));
            return false;
        }
    }

    if retval {
        if let Some(reloc) = reloc {
            reloc.skip_rest(sec_id, diag);
        }
    }

    retval
}
