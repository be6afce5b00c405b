//! Loader for `.debug_aranges`.
//!
//! Each table names a CU and lists `(address, length)` tuples. Tuples are
//! cross-checked against the address space the CUs claimed via
//! `low_pc`/`high_pc` or ranges: anything covered by CUs but absent from
//! aranges is reported, unless the gap is just section alignment padding.

use crate::coverage::{necessary_alignment, Coverage};
use crate::elf::{ElfFile, ElfSection};
use crate::info::{check_zero_padding, find_cu, read_size_extra, supported_version, Cu};
use crate::messages::{range_fmt, Category, Diagnostics, SectionId, Where, WhereFormat};
use crate::readctx::ReadCtx;
use crate::reloc::{next_and_apply, RelocTarget};
use crate::CheckConfig;

/// Reports spans covered by CUs but missing from `other`, tolerating holes
/// that sit entirely inside a section's natural alignment padding.
fn compare_coverage(
    file: &ElfFile<'_>,
    coverage: &Coverage,
    other: &Coverage,
    id: SectionId,
    what: &str,
    diag: &Diagnostics,
) {
    let mut cov = coverage.clone();
    cov.remove_all(other);

    for (start, end) in cov.iter() {
        let length = end - start;

        // Check alignment against the section the hole lies in; simply
        // assume the first section it intersects.
        let sec = file.sections.iter().skip(1).find(|sec| {
            let s_end = sec.sh_addr + sec.sh_size;
            start >= sec.sh_addr && start + length < s_end
        });

        match sec {
            Some(sec) if necessary_alignment(start, length, sec.sh_addralign) => {}
            Some(_) => {
                diag.message(
                    Category::ARANGES | Category::IMPACT_3,
                    &Where::new(id),
                    format_args!(
                        "addresses {} are covered with CUs, but not with {what}.",
                        range_fmt(start, end)
                    ),
                );
            }
            None => {
                diag.message(
                    Category::ARANGES | Category::IMPACT_3,
                    &Where::new(id),
                    format_args!(
                        "addresses {} are covered with CUs, but not with {what}.",
                        range_fmt(start, end)
                    ),
                );
                diag.error_plain(format_args!(
                    "Couldn't find the section containing the above hole."
                ));
            }
        }
    }
}

/// Checks the structure of `.debug_aranges`. `coverage`, when supplied, is
/// the address space covered by CUs; the aranges are compared against it
/// at the end.
pub fn check_aranges(
    file: &ElfFile<'_>,
    sec: &ElfSection<'_>,
    cus: &[Cu],
    coverage: Option<&Coverage>,
    cfg: &CheckConfig,
    diag: &Diagnostics,
) -> bool {
    let data = match sec.data {
        Some(data) => data,
        None => return false,
    };
    let mut ctx = ReadCtx::new(data, file.little_endian);
    let reloc = sec.rel.as_ref();

    let mut retval = true;
    let mut aranges_coverage = coverage.map(|_| Coverage::new());

    while !ctx.eof() {
        let atab_begin = ctx.offset();
        let mut wh = Where::new(SectionId::Aranges);
        wh.reset_1(atab_begin);

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

        let atab_end = ctx.offset() + size;
        let mut sub_ctx = match ctx.sub(atab_begin, atab_end) {
            Some(sub) => sub,
            None => {
                diag.error(&wh, format_args!("not enough data for next table."));
                return false;
            }
        };
        sub_ctx.seek(ctx.offset() - atab_begin).unwrap_or_default();

        'table: loop {
            // Version.
            let version = match sub_ctx.read_u16() {
                Some(version) => version,
                None => {
                    diag.error(&wh, format_args!("can't read version."));
                    retval = false;
                    break;
                }
            };
            if !supported_version(version, &[2], &wh, diag) {
                retval = false;
                break;
            }

            // CU offset.
            let ctx_offset = atab_begin + sub_ctx.offset();
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
                    Category::IMPACT_2 | Category::ARANGES | Category::RELOC | Category::HEADER,
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
                let mut where_cudie = Where::new(SectionId::Info);
                where_cudie.reset_1(cu.cudie_offset);
                where_cudie.set_format(WhereFormat::CuDie);
                wh.set_context(Some(&where_cudie));
                if cu.has_arange.get() {
                    diag.message(
                        Category::IMPACT_2 | Category::ARANGES | Category::HEADER,
                        &wh,
                        format_args!("there has already been arange section for this CU."),
                    );
                } else {
                    cu.has_arange.set(true);
                }
            }

            // Address size.
            let address_size = match sub_ctx.read_u8() {
                Some(size) => size,
                None => {
                    diag.error(&wh, format_args!("can't read address size."));
                    retval = false;
                    break;
                }
            };
            match cu {
                Some(cu) => {
                    if address_size != cu.address_size {
                        diag.error(
                            &wh,
                            format_args!(
                                "address size {address_size} doesn't match referred CU."
                            ),
                        );
                        retval = false;
                    }
                }
                // Try to parse anyway, unless the address size is wacky.
                None if address_size != 4 && address_size != 8 => {
                    diag.error(
                        &wh,
                        format_args!("invalid address size: {address_size}."),
                    );
                    retval = false;
                    break;
                }
                None => {}
            }

            // Segment size.
            let segment_size = match sub_ctx.read_u8() {
                Some(size) => size,
                None => {
                    diag.error(&wh, format_args!("can't read unit segment size."));
                    retval = false;
                    break;
                }
            };
            if segment_size != 0 {
                diag.warning(&wh, format_args!("can't handle segment_size != 0."));
                retval = false;
                break;
            }

            // 7.20: The first tuple following the header begins at an
            // offset that is a multiple of twice the address size; the
            // header is padded to that boundary.
            let tuple_size = 2 * u64::from(address_size);
            let off = sub_ctx.offset();
            if off % tuple_size != 0 {
                let noff = (off / tuple_size + 1) * tuple_size;
                for _ in off..noff {
                    let byte = match sub_ctx.read_u8() {
                        Some(byte) => byte,
                        None => {
                            diag.error(
                                &wh,
                                format_args!(
                                    "section ends after the header, \
                                     but before the first entry."
                                ),
                            );
                            retval = false;
                            break 'table;
                        }
                    };
                    if byte != 0 {
                        diag.message(
                            Category::IMPACT_2 | Category::ARANGES | Category::HEADER,
                            &wh,
                            format_args!(
                                "non-zero byte at {:#x} in padding before the first entry.",
                                sub_ctx.offset()
                            ),
                        );
                    }
                }
            }

            // Tuples. Aranges are reported by their offset rather than by
            // the sorted index readelf would print, the better to pin
            // structural errors to bytes.
            while !sub_ctx.eof() {
                wh.reset_2(sub_ctx.offset());

                // Address.
                let ctx_offset = atab_begin + sub_ctx.offset();
                let mut address = match sub_ctx.read_var(address_size) {
                    Some(address) => address,
                    None => {
                        diag.error(&wh, format_args!("can't read address field."));
                        retval = false;
                        break;
                    }
                };
                let address_relocated = next_and_apply(
                    reloc,
                    file,
                    ctx_offset,
                    address_size,
                    &mut address,
                    &wh,
                    RelocTarget::Address,
                    diag,
                )
                .is_some();
                if !address_relocated && file.is_rel() && address != 0 {
                    diag.message(
                        Category::IMPACT_2 | Category::ARANGES | Category::RELOC,
                        &wh,
                        format_args!("address field seems to lack a relocation."),
                    );
                }

                // Length.
                let length = match sub_ctx.read_var(address_size) {
                    Some(length) => length,
                    None => {
                        diag.error(&wh, format_args!("can't read length field."));
                        retval = false;
                        break;
                    }
                };

                // A relocated address can look like the terminator and
                // still be live.
                if address == 0 && length == 0 && !address_relocated {
                    break;
                }

                if length == 0 {
                    // DWARF 3 6.1.2: each descriptor is a beginning address
                    // followed by the non-zero length of that range.
                    diag.error(&wh, format_args!("zero-length address range."));
                } else if retval {
                    // Skip coverage analysis if we have errors.
                    if let Some(aranges_cov) = &mut aranges_coverage {
                        if aranges_cov.is_overlap(address, length)
                            && !cfg.gnu
                            && !cfg.tolerant
                        {
                            // Not a show stopper.
                            diag.message(
                                Category::ARANGES | Category::IMPACT_2 | Category::ERROR,
                                &wh,
                                format_args!(
                                    "the range {} overlaps with another one.",
                                    range_fmt(address, address + length)
                                ),
                            );
                        }
                        aranges_cov.add(address, length);
                    }
                }
            }

            if !sub_ctx.eof()
                && !check_zero_padding(
                    &mut sub_ctx,
                    Category::ARANGES,
                    &Where::new(SectionId::Aranges),
                    diag,
                )
            {
                diag.padding_nonzero(
                    Category::ARANGES | Category::ERROR,
                    &Where::new(SectionId::Aranges),
                    sub_ctx.offset(),
                    sub_ctx.offset() + size,
                );
                retval = false;
            }

            break;
        }

        if ctx.skip(size).is_none() {
            // A "can't happen" error.
            diag.error(&wh, format_args!("not enough data for next table."));
            return false;
        }
    }

    if let (Some(aranges_cov), Some(coverage)) = (&aranges_coverage, coverage) {
        compare_coverage(file, coverage, aranges_cov, SectionId::Aranges, "aranges", diag);
    }

    retval
}
