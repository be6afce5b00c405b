//! Loader for `.debug_line`.
//!
//! Validates each table's header (directory and file vectors, the standard
//! opcode length table) and then the opcode stream: extended opcodes must
//! consume exactly their declared length, file indices must resolve, and a
//! program with opcodes must end in `DW_LNE_end_sequence`. At the end every
//! `DW_AT_stmt_list` recorded on a CU must name the start of some table.

use gimli::constants as dw;

use crate::coverage::AddrRecord;
use crate::elf::{ElfFile, ElfSection};
use crate::info::{check_zero_padding, read_size_extra, supported_version, Cu};
use crate::messages::{checked_uleb128, Category, Diagnostics, SectionId, Where};
use crate::readctx::ReadCtx;
use crate::reloc::{next_and_apply, RelocTarget};

struct IncludeDirectory<'data> {
    name: &'data [u8],
    used: bool,
}

struct FileEntry<'data> {
    name: &'data [u8],
    used: bool,
}

/// Reads and validates one directory index belonging to a file entry.
fn read_directory_index(
    ctx: &mut ReadCtx<'_>,
    dirs: &mut [IncludeDirectory<'_>],
    name: &[u8],
    file_number: usize,
    wh: &Where,
    retval: &mut bool,
    diag: &Diagnostics,
) -> Option<u64> {
    let idx = checked_uleb128(ctx, diag, wh, "directory index")?;

    if name.first() == Some(&b'/') && idx != 0 {
        diag.message(
            Category::IMPACT_2 | Category::LINE | Category::HEADER,
            wh,
            format_args!(
                "file #{file_number} has absolute pathname, but refers to directory != 0."
            ),
        );
    }
    // Not >=, directories are indexed from 1.
    if idx > dirs.len() as u64 {
        diag.message(
            Category::IMPACT_4 | Category::LINE | Category::HEADER,
            wh,
            format_args!(
                "file #{file_number} refers to directory #{idx}, which wasn't defined."
            ),
        );
        // A consumer might choke on that.
        *retval = false;
    } else if idx != 0 {
        dirs[idx as usize - 1].used = true;
    }
    Some(idx)
}

fn use_file(files: &mut [FileEntry<'_>], file_idx: u64, wh: &Where, retval: &mut bool, diag: &Diagnostics) {
    if file_idx == 0 || file_idx > files.len() as u64 {
        diag.error(
            wh,
            format_args!("DW_LNS_set_file: invalid file index {file_idx}."),
        );
        *retval = false;
    } else {
        files[file_idx as usize - 1].used = true;
    }
}

/// Checks the structure of `.debug_line`.
pub fn check_line(file: &ElfFile<'_>, sec: &ElfSection<'_>, cus: &[Cu], diag: &Diagnostics) -> bool {
    let data = match sec.data {
        Some(data) => data,
        None => return false,
    };
    let mut ctx = ReadCtx::new(data, file.little_endian);
    let reloc = sec.rel.as_ref();

    let mut retval = true;
    let mut line_tables = AddrRecord::new();

    while !ctx.eof() {
        let set_offset = ctx.offset();
        let mut wh = Where::new(SectionId::Line);
        wh.reset_1(set_offset);
        line_tables.add(set_offset);

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
        if set_end > ctx.len() {
            diag.error(&wh, format_args!("not enough data for next unit."));
            return false;
        }
        // Keep the section base so that diagnostics report section-relative
        // offsets.
        let mut sub_ctx = match ctx.truncated(set_end) {
            Some(sub) => sub,
            None => {
                diag.error(&wh, format_args!("not enough data for next unit."));
                return false;
            }
        };

        'table: loop {
            // Version.
            let version = match sub_ctx.read_u16() {
                Some(version) => version,
                None => {
                    diag.error(&wh, format_args!("can't read set version."));
                    retval = false;
                    break 'table;
                }
            };
            if !supported_version(version, &[2, 3], &wh, diag) {
                retval = false;
                break 'table;
            }

            // Header length.
            let header_length = match sub_ctx.read_offset(dwarf_64) {
                Some(len) => len,
                None => {
                    diag.error(&wh, format_args!("can't read header length."));
                    retval = false;
                    break 'table;
                }
            };
            let program_start = sub_ctx.offset() + header_length;

            // Minimum instruction length.
            if sub_ctx.read_u8().is_none() {
                diag.error(&wh, format_args!("can't read minimum instruction length."));
                retval = false;
                break 'table;
            }

            // Default value of is_stmt.
            let default_is_stmt = match sub_ctx.read_u8() {
                Some(byte) => byte,
                None => {
                    diag.error(&wh, format_args!("can't read default_is_stmt."));
                    retval = false;
                    break 'table;
                }
            };
            // 7.21: booleans are encoded as a single byte containing 0 for
            // false and a non-zero value for true. Give a notice anyway.
            if default_is_stmt != 0 && default_is_stmt != 1 {
                diag.message(
                    Category::LINE | Category::IMPACT_2 | Category::HEADER,
                    &wh,
                    format_args!("default_is_stmt should be 0 or 1, not {default_is_stmt}."),
                );
            }

            // Line base (signed).
            if sub_ctx.read_u8().is_none() {
                diag.error(&wh, format_args!("can't read line_base."));
                retval = false;
                break 'table;
            }

            // Line range.
            if sub_ctx.read_u8().is_none() {
                diag.error(&wh, format_args!("can't read line_range."));
                retval = false;
                break 'table;
            }

            // Opcode base.
            let mut opcode_base = match sub_ctx.read_u8() {
                Some(byte) => byte,
                None => {
                    diag.error(&wh, format_args!("can't read opcode_base."));
                    retval = false;
                    break 'table;
                }
            };
            if opcode_base == 0 {
                diag.error(&wh, format_args!("opcode base set to 0."));
                // Opcodes are numbered from 1.
                opcode_base = 1;
            }

            // Standard opcode lengths.
            let mut std_opc_lengths = Vec::with_capacity(usize::from(opcode_base) - 1);
            for i in 0..u32::from(opcode_base) - 1 {
                match sub_ctx.read_u8() {
                    Some(len) => std_opc_lengths.push(len),
                    None => {
                        diag.error(
                            &wh,
                            format_args!("can't read length of standard opcode #{i}."),
                        );
                        retval = false;
                        break 'table;
                    }
                }
            }

            // Include directories.
            let mut dirs: Vec<IncludeDirectory<'_>> = Vec::new();
            loop {
                let name = match sub_ctx.read_str() {
                    Some(name) => name,
                    None => {
                        diag.error(
                            &wh,
                            format_args!(
                                "can't read name of include directory #{}.",
                                dirs.len() + 1 // Numbered from 1.
                            ),
                        );
                        retval = false;
                        break 'table;
                    }
                };
                if name.is_empty() {
                    break;
                }
                dirs.push(IncludeDirectory { name, used: false });
            }

            // File names.
            let mut files: Vec<FileEntry<'_>> = Vec::new();
            loop {
                let name = match sub_ctx.read_str() {
                    Some(name) => name,
                    None => {
                        diag.error(
                            &wh,
                            format_args!("can't read name of file #{}.", files.len() + 1),
                        );
                        retval = false;
                        break 'table;
                    }
                };
                if name.is_empty() {
                    break;
                }

                if read_directory_index(
                    &mut sub_ctx,
                    &mut dirs,
                    name,
                    files.len() + 1,
                    &wh,
                    &mut retval,
                    diag,
                )
                .is_none()
                {
                    retval = false;
                    break 'table;
                }

                // Modification time and size of the file.
                if checked_uleb128(&mut sub_ctx, diag, &wh, "timestamp of file entry").is_none() {
                    retval = false;
                    break 'table;
                }
                if checked_uleb128(&mut sub_ctx, diag, &wh, "file size of file entry").is_none() {
                    retval = false;
                    break 'table;
                }

                files.push(FileEntry { name, used: false });
            }

            // The program should start where the header said it would.
            if sub_ctx.offset() > program_start {
                diag.error(
                    &wh,
                    format_args!(
                        "header claims that it has a size of {header_length:#x}, but in fact \
                         it has a size of {:#x}.",
                        sub_ctx.offset() - program_start + header_length
                    ),
                );
                // Assume the header lies, and what follows is in fact the
                // line number program.
                retval = false;
            } else if sub_ctx.offset() < program_start {
                let start = sub_ctx.offset();
                let end = program_start.min(sub_ctx.len());
                if sub_ctx.data()[start as usize..end as usize]
                    .iter()
                    .all(|&b| b == 0)
                {
                    diag.padding_zero(Category::LINE | Category::HEADER, &wh, start, end);
                } else {
                    diag.padding_nonzero(
                        Category::LINE | Category::HEADER,
                        &Where::new(SectionId::Line),
                        start,
                        end,
                    );
                }
                sub_ctx.seek(end).unwrap_or_default();
            }

            let mut terminated = false;
            let mut first_file = true;
            let mut seen_opcode = false;

            while !sub_ctx.eof() {
                wh.reset_2(sub_ctx.offset());
                let opcode = match sub_ctx.read_u8() {
                    Some(opcode) => opcode,
                    None => {
                        diag.error(&wh, format_args!("can't read opcode."));
                        retval = false;
                        break 'table;
                    }
                };

                let mut operands: u32 = 0;
                let mut extended: u8 = 0;
                match opcode {
                    // Extended opcodes.
                    0 => {
                        let skip_len =
                            match checked_uleb128(&mut sub_ctx, diag, &wh, "length of extended opcode")
                            {
                                Some(len) => len,
                                None => {
                                    retval = false;
                                    break 'table;
                                }
                            };
                        let next_off = (sub_ctx.offset() + skip_len).min(sub_ctx.len());

                        extended = match sub_ctx.read_u8() {
                            Some(byte) => byte,
                            None => {
                                diag.error(&wh, format_args!("can't read extended opcode."));
                                retval = false;
                                break 'table;
                            }
                        };

                        let mut handled = true;
                        match dw::DwLne(extended) {
                            dw::DW_LNE_end_sequence => terminated = true,

                            dw::DW_LNE_set_address => {
                                let ctx_offset = sub_ctx.offset();
                                let width: u8 = if file.is_64 { 8 } else { 4 };
                                let mut addr = match sub_ctx.read_offset(file.is_64) {
                                    Some(addr) => addr,
                                    None => {
                                        diag.error(
                                            &wh,
                                            format_args!(
                                                "can't read operand of DW_LNE_set_address."
                                            ),
                                        );
                                        retval = false;
                                        break 'table;
                                    }
                                };
                                let applied = next_and_apply(
                                    reloc,
                                    file,
                                    ctx_offset,
                                    width,
                                    &mut addr,
                                    &wh,
                                    RelocTarget::Address,
                                    diag,
                                );
                                if applied.is_none() && file.is_rel() {
                                    diag.message(
                                        Category::IMPACT_2 | Category::LINE | Category::RELOC,
                                        &wh,
                                        format_args!(
                                            "DW_LNE_set_address seems to lack a relocation."
                                        ),
                                    );
                                }
                            }

                            dw::DW_LNE_define_file => {
                                let name = match sub_ctx.read_str() {
                                    Some(name) => name,
                                    None => {
                                        diag.error(
                                            &wh,
                                            format_args!(
                                                "can't read filename operand of \
                                                 DW_LNE_define_file."
                                            ),
                                        );
                                        retval = false;
                                        break 'table;
                                    }
                                };
                                if read_directory_index(
                                    &mut sub_ctx,
                                    &mut dirs,
                                    name,
                                    files.len() + 1,
                                    &wh,
                                    &mut retval,
                                    diag,
                                )
                                .is_none()
                                {
                                    retval = false;
                                    break 'table;
                                }
                                files.push(FileEntry { name, used: false });
                                // Skip mtime & size of the file.
                                operands = 2;
                            }

                            _ => {
                                handled = false;
                                diag.message(
                                    Category::IMPACT_2 | Category::LINE,
                                    &wh,
                                    format_args!("unknown extended opcode #{extended}."),
                                );
                            }
                        }

                        // Consume the declared remainder of the opcode.
                        for _ in 0..operands {
                            if checked_uleb128(
                                &mut sub_ctx,
                                diag,
                                &wh,
                                &format!("operand of extended opcode {extended}"),
                            )
                            .is_none()
                            {
                                retval = false;
                                break 'table;
                            }
                        }
                        operands = 0;

                        if sub_ctx.offset() > next_off {
                            diag.error(
                                &wh,
                                format_args!(
                                    "opcode claims that it has a size of {skip_len:#x}, \
                                     but in fact it has a size of {:#x}.",
                                    skip_len + (sub_ctx.offset() - next_off)
                                ),
                            );
                            retval = false;
                        } else if sub_ctx.offset() < next_off {
                            if handled {
                                let start = sub_ctx.offset();
                                if sub_ctx.data()[start as usize..next_off as usize]
                                    .iter()
                                    .all(|&b| b == 0)
                                {
                                    diag.padding_zero(Category::LINE, &wh, start, next_off);
                                } else {
                                    diag.padding_nonzero(
                                        Category::LINE,
                                        &Where::new(SectionId::Line),
                                        start,
                                        next_off,
                                    );
                                }
                            }
                            sub_ctx.seek(next_off).unwrap_or_default();
                        }
                    }

                    // Standard opcodes that need validation or have
                    // non-ULEB operands.
                    _ if dw::DwLns(opcode) == dw::DW_LNS_fixed_advance_pc => {
                        if sub_ctx.read_u16().is_none() {
                            diag.error(
                                &wh,
                                format_args!("can't read operand of DW_LNS_fixed_advance_pc."),
                            );
                            retval = false;
                            break 'table;
                        }
                    }

                    _ if dw::DwLns(opcode) == dw::DW_LNS_set_file => {
                        let file_idx =
                            match checked_uleb128(&mut sub_ctx, diag, &wh, "DW_LNS_set_file operand")
                            {
                                Some(idx) => idx,
                                None => {
                                    retval = false;
                                    break 'table;
                                }
                            };
                        use_file(&mut files, file_idx, &wh, &mut retval, diag);
                        first_file = false;
                    }

                    _ if dw::DwLns(opcode) == dw::DW_LNS_set_isa => {
                        operands = 1;
                    }

                    // All the other opcodes.
                    _ => {
                        if opcode < opcode_base {
                            operands = u32::from(std_opc_lengths[usize::from(opcode) - 1]);
                            if opcode > dw::DW_LNS_set_epilogue_begin.0 {
                                // Inside the declared standard set, but not
                                // an opcode we know.
                                diag.message(
                                    Category::IMPACT_2 | Category::LINE,
                                    &wh,
                                    format_args!("unknown standard opcode #{opcode}."),
                                );
                            }
                        }
                    }
                }

                for i in 0..operands {
                    let what = if opcode != 0 {
                        format!("operand #{i} of {}", dw::DwLns(opcode))
                    } else {
                        format!("operand #{i} of extended opcode {extended}")
                    };
                    if checked_uleb128(&mut sub_ctx, diag, &wh, &what).is_none() {
                        retval = false;
                        break 'table;
                    }
                }

                if first_file {
                    // The program references file #1 from the start without
                    // any explicit DW_LNS_set_file.
                    use_file(&mut files, 1, &wh, &mut retval, diag);
                    first_file = false;
                }

                if opcode != 0 || extended != dw::DW_LNE_end_sequence.0 {
                    seen_opcode = true;
                }
            }

            for (i, dir) in dirs.iter().enumerate() {
                if !dir.used {
                    diag.message(
                        Category::IMPACT_3
                            | Category::ACC_BLOAT
                            | Category::LINE
                            | Category::HEADER,
                        &wh,
                        format_args!(
                            "the include #{} `{}' is not used.",
                            i + 1,
                            String::from_utf8_lossy(dir.name)
                        ),
                    );
                }
            }
            for (i, f) in files.iter().enumerate() {
                if !f.used {
                    diag.message(
                        Category::IMPACT_3
                            | Category::ACC_BLOAT
                            | Category::LINE
                            | Category::HEADER,
                        &wh,
                        format_args!(
                            "the file #{} `{}' is not used.",
                            i + 1,
                            String::from_utf8_lossy(f.name)
                        ),
                    );
                }
            }

            if !seen_opcode {
                diag.message(
                    Category::LINE | Category::ACC_BLOAT | Category::IMPACT_3,
                    &wh,
                    format_args!("empty line number program."),
                );
            }
            if !terminated {
                if seen_opcode {
                    diag.error(
                        &wh,
                        format_args!(
                            "sequence of opcodes not terminated with DW_LNE_end_sequence."
                        ),
                    );
                }
            } else if !sub_ctx.eof()
                && !check_zero_padding(
                    &mut sub_ctx,
                    Category::LINE,
                    &Where::new(SectionId::Line),
                    diag,
                )
            {
                diag.padding_nonzero(
                    Category::LINE,
                    &Where::new(SectionId::Line),
                    sub_ctx.offset(),
                    sub_ctx.len(),
                );
            }

            break 'table;
        }

        if ctx.skip(size).is_none() {
            diag.error(&wh, format_args!("not enough data for next unit."));
            return false;
        }
    }

    if retval {
        if let Some(reloc) = reloc {
            reloc.skip_rest(SectionId::Line, diag);
        }

        for cu in cus {
            for r in &cu.line_refs {
                if !line_tables.has(r.addr) {
                    diag.error(
                        &r.who,
                        format_args!("unresolved reference to .debug_line table {:#x}.", r.addr),
                    );
                }
            }
        }
    }

    retval
}
