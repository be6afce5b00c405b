//! End-to-end checks over synthetic section images.

use std::cell::Cell;
use std::io::Write;
use std::sync::{Arc, Mutex};

use similar_asserts::assert_eq;

use dwarfcheck::abbrev::load_abbrevs;
use dwarfcheck::aranges::check_aranges;
use dwarfcheck::coverage::{AddrRecord, Ref};
use dwarfcheck::elf::{ElfFile, ElfSection};
use dwarfcheck::info::{check_info, Cu, CuCoverage};
use dwarfcheck::line::check_line;
use dwarfcheck::locranges::check_loc_or_range;
use dwarfcheck::pubtables::check_pub;
use dwarfcheck::readctx::ReadCtx;
use dwarfcheck::{
    assemble_criteria, check_file, CheckConfig, Diagnostics, SectionId, Where,
};

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

fn capture(config: &CheckConfig) -> (Diagnostics, SharedSink) {
    let sink = SharedSink::default();
    let (warning, error) = assemble_criteria(config);
    let diag = Diagnostics::with_writer(warning, error, config.show_refs, Box::new(sink.clone()));
    (diag, sink)
}

fn uleb(mut value: u64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            return out;
        }
    }
}

fn dyn_file() -> ElfFile<'static> {
    ElfFile::empty(
        true,
        false,
        goblin::elf::header::ET_DYN,
        goblin::elf::header::EM_X86_64,
    )
}

fn section<'data>(name: &str, data: &'data [u8]) -> ElfSection<'data> {
    let mut sec = ElfSection::new(name);
    sec.data = Some(data);
    sec
}

fn cu(offset: u64, cudie_offset: u64, length: u64, address_size: u8) -> Cu {
    let mut wh = Where::new(SectionId::Info);
    wh.reset_1(offset);
    Cu {
        offset,
        cudie_offset,
        length,
        address_size,
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

/// The abbrev table for the sibling scenario: code 1 is a compile unit
/// with children and a single `DW_AT_sibling`/`DW_FORM_ref4` attribute.
fn sibling_abbrevs() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend(uleb(1)); // code
    out.extend(uleb(0x11)); // DW_TAG_compile_unit
    out.push(1); // has_children
    out.extend(uleb(0x01)); // DW_AT_sibling
    out.extend(uleb(0x13)); // DW_FORM_ref4
    out.extend([0, 0]);
    out.push(0); // table terminator
    out
}

#[test]
fn test_missing_sibling_target() {
    let abbrev_data = sibling_abbrevs();
    // One CU; its DIE at 0x0b advertises a sibling at 0x20, but the chain
    // ends at 0x11.
    let mut info = vec![0x0e, 0, 0, 0]; // CU length
    info.extend([0x02, 0x00]); // version 2
    info.extend([0, 0, 0, 0]); // abbrev offset
    info.push(4); // address size
    info.extend(uleb(1)); // DIE 0x0b, code 1
    info.extend([0x20, 0, 0, 0]); // DW_AT_sibling = 0x20
    info.push(0); // empty children chain
    info.push(0); // end of sibling chain at 0x11

    let config = CheckConfig::default();
    let (diag, sink) = capture(&config);
    let file = dyn_file();

    let mut ctx = ReadCtx::new(&abbrev_data, true);
    let tables = load_abbrevs(&mut ctx, &diag).unwrap();

    let sec = section(".debug_info", &info);
    let mut cu_cov = CuCoverage::default();
    let cus = check_info(&file, &sec, &tables, None, &mut cu_cov, &diag).unwrap();

    assert_eq!(cus.len(), 1);
    assert_eq!(
        sink.contents(),
        "warning: .debug_info: CU 0: DIE 0xb (.debug_abbrev: section 0: abbreviation 1): \
         abbrev has_children, but the chain was empty.\n\
         error: .debug_info: CU 0: DIE 0x11: This DIE should have had its sibling at 0x20, \
         but it's at 0x11 instead.\n"
    );
}

#[test]
fn test_overlapping_ranges() {
    // Listhead at 0x00 with entries [0x1000, 0x1010) and [0x1008, 0x1020).
    let mut ranges = Vec::new();
    for value in [0x1000u32, 0x1010, 0x1008, 0x1020, 0, 0] {
        ranges.extend(value.to_le_bytes());
    }

    let config = CheckConfig::default();
    let (diag, sink) = capture(&config);
    let file = dyn_file();
    let sec = section(".debug_ranges", &ranges);

    let mut referrer = cu(0, 0xb, 0x12, 4);
    referrer.low_pc = Some(0);
    let mut who = Where::new(SectionId::Info);
    who.reset_1(0);
    referrer.range_refs.push(Ref { addr: 0, who });
    let cus = vec![referrer];

    let mut cu_cov = CuCoverage::default();
    let sound = check_loc_or_range(&file, &sec, &cus, Some(&mut cu_cov), &diag);

    assert!(!sound);
    assert_eq!(
        sink.contents(),
        "error: .debug_ranges: rangelist 0x8: range definitions overlap.\n"
    );
}

#[test]
fn test_arange_zero_length() {
    let mut aranges = vec![28, 0, 0, 0]; // table length
    aranges.extend([0x02, 0x00]); // version 2
    aranges.extend([0, 0, 0, 0]); // CU offset
    aranges.push(4); // address size
    aranges.push(0); // segment size
    aranges.extend([0, 0, 0, 0]); // header padding to 2 * address size
    aranges.extend(0x1000u32.to_le_bytes()); // address
    aranges.extend(0u32.to_le_bytes()); // zero length
    aranges.extend([0; 8]); // terminator

    let config = CheckConfig::default();
    let (diag, sink) = capture(&config);
    let file = dyn_file();
    let sec = section(".debug_aranges", &aranges);
    let cus = vec![cu(0, 0xb, 0x12, 4)];

    check_aranges(&file, &sec, &cus, None, &config, &diag);

    assert!(sink.contents().contains("zero-length address range."));
    assert_eq!(diag.error_count(), 1);
    assert!(cus[0].has_arange.get());
}

#[test]
fn test_line_program_not_terminated() {
    let mut line = Vec::new();
    line.extend(33u32.to_le_bytes()); // unit length
    line.extend([0x02, 0x00]); // version 2
    line.extend(26u32.to_le_bytes()); // header length
    line.push(1); // minimum instruction length
    line.push(1); // default_is_stmt
    line.push(0); // line_base
    line.push(1); // line_range
    line.push(13); // opcode_base
    line.extend([0, 1, 1, 1, 1, 0, 0, 0, 1, 0, 0, 1]); // standard lengths
    line.push(0); // no include directories
    line.extend(b"a.c\0"); // file #1
    line.extend([0, 0, 0]); // dir index, mtime, size
    line.push(0); // end of file table
    line.push(0x01); // DW_LNS_copy, then end of section

    let config = CheckConfig::default();
    let (diag, sink) = capture(&config);
    let file = dyn_file();
    let sec = section(".debug_line", &line);

    let sound = check_line(&file, &sec, &[], &diag);

    assert!(!sound);
    assert_eq!(
        sink.contents(),
        "error: .debug_line: table 0: offset 0x24: sequence of opcodes not terminated \
         with DW_LNE_end_sequence.\n"
    );
}

#[test]
fn test_pubname_targets_a_hole() {
    let mut pub_data = Vec::new();
    pub_data.extend(22u32.to_le_bytes()); // set length
    pub_data.extend([0x02, 0x00]); // version 2
    pub_data.extend(0u32.to_le_bytes()); // CU offset
    pub_data.extend(0x30u32.to_le_bytes()); // covered length
    pub_data.extend(0x42u32.to_le_bytes()); // DIE offset
    pub_data.extend(b"foo\0");
    pub_data.extend(0u32.to_le_bytes()); // terminator

    let config = CheckConfig::default();
    let (diag, sink) = capture(&config);
    let file = dyn_file();
    let sec = section(".debug_pubnames", &pub_data);

    let mut referenced = cu(0, 0xb, 0x30, 4);
    referenced.die_addrs.add(0x0b);
    referenced.die_addrs.add(0x15);
    let cus = vec![referenced];

    let sound = check_pub(&file, &sec, &cus, &diag);

    assert!(!sound);
    assert!(sink
        .contents()
        .contains("unresolved reference to DIE 0x42."));
}

#[test]
fn test_empty_info_is_silent() {
    let config = CheckConfig::default();
    let (diag, sink) = capture(&config);
    let file = dyn_file();
    let sec = section(".debug_info", &[]);

    let mut cu_cov = CuCoverage::default();
    let cus = check_info(&file, &sec, &[], None, &mut cu_cov, &diag).unwrap();

    assert!(cus.is_empty());
    assert_eq!(sink.contents(), "");
}

#[test]
fn test_dwarf64_initial_length() {
    // Abbrev: code 1 is a childless compile unit with no attributes.
    let mut abbrev_data = Vec::new();
    abbrev_data.extend(uleb(1));
    abbrev_data.extend(uleb(0x11));
    abbrev_data.push(0);
    abbrev_data.extend([0, 0]);
    abbrev_data.push(0);

    // 0xffffffff escapes into a 64-bit length.
    let mut info = Vec::new();
    info.extend(0xffff_ffffu32.to_le_bytes());
    info.extend(13u64.to_le_bytes());
    info.extend([0x03, 0x00]); // version 3
    info.extend(0u64.to_le_bytes()); // abbrev offset, 8 bytes now
    info.push(4); // address size
    info.extend(uleb(1)); // the CU DIE
    info.push(0); // end of chain

    let config = CheckConfig::default();
    let (diag, sink) = capture(&config);
    let file = dyn_file();

    let mut ctx = ReadCtx::new(&abbrev_data, true);
    let tables = load_abbrevs(&mut ctx, &diag).unwrap();

    let sec = section(".debug_info", &info);
    let mut cu_cov = CuCoverage::default();
    let cus = check_info(&file, &sec, &tables, None, &mut cu_cov, &diag).unwrap();

    assert_eq!(sink.contents(), "");
    assert_eq!(cus.len(), 1);
    assert_eq!(cus[0].address_size, 4);
    assert_eq!(cus[0].cudie_offset, 23);
    assert_eq!(cus[0].length, 25);
}

#[test]
fn test_unresolved_local_reference() {
    // Code 1: compile unit with children; code 2: a childless DIE with a
    // DW_AT_type/DW_FORM_ref4 pointing mid-DIE.
    let mut abbrev_data = Vec::new();
    abbrev_data.extend(uleb(1));
    abbrev_data.extend(uleb(0x11));
    abbrev_data.push(1);
    abbrev_data.extend([0, 0]);
    abbrev_data.extend(uleb(2));
    abbrev_data.extend(uleb(0x34)); // DW_TAG_variable
    abbrev_data.push(0);
    abbrev_data.extend(uleb(0x49)); // DW_AT_type
    abbrev_data.extend(uleb(0x13)); // DW_FORM_ref4
    abbrev_data.extend([0, 0]);
    abbrev_data.push(0);

    let mut info = vec![0; 4]; // patched below
    info.extend([0x02, 0x00]);
    info.extend([0, 0, 0, 0]);
    info.push(4);
    info.extend(uleb(1)); // CU DIE at 0x0b
    info.extend(uleb(2)); // child at 0x0c
    info.extend(0x0du32.to_le_bytes()); // reference into the middle of itself
    info.push(0); // end of children
    info.push(0); // end of chain
    let length = (info.len() - 4) as u32;
    info[..4].copy_from_slice(&length.to_le_bytes());

    let config = CheckConfig::default();
    let (diag, sink) = capture(&config);
    let file = dyn_file();

    let mut ctx = ReadCtx::new(&abbrev_data, true);
    let tables = load_abbrevs(&mut ctx, &diag).unwrap();

    let sec = section(".debug_info", &info);
    let mut cu_cov = CuCoverage::default();
    let cus = check_info(&file, &sec, &tables, None, &mut cu_cov, &diag);

    // The reference does not survive resolution, so the CU table is
    // withheld from the dependent passes.
    assert!(cus.is_none());
    assert!(sink
        .contents()
        .contains("unresolved reference to DIE 0xd."));
}

/// A minimal ELF64 object with only a section-header string table: the
/// whole-file driver reports the debug sections it cannot find.
fn minimal_elf() -> Vec<u8> {
    let shstrtab = b"\0.shstrtab\0";
    let mut out = Vec::new();

    // ELF header.
    out.extend([0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
    out.extend([0; 8]);
    out.extend(1u16.to_le_bytes()); // e_type = ET_REL
    out.extend(62u16.to_le_bytes()); // e_machine = EM_X86_64
    out.extend(1u32.to_le_bytes()); // e_version
    out.extend(0u64.to_le_bytes()); // e_entry
    out.extend(0u64.to_le_bytes()); // e_phoff
    out.extend(64u64.to_le_bytes()); // e_shoff
    out.extend(0u32.to_le_bytes()); // e_flags
    out.extend(64u16.to_le_bytes()); // e_ehsize
    out.extend(0u16.to_le_bytes()); // e_phentsize
    out.extend(0u16.to_le_bytes()); // e_phnum
    out.extend(64u16.to_le_bytes()); // e_shentsize
    out.extend(2u16.to_le_bytes()); // e_shnum
    out.extend(1u16.to_le_bytes()); // e_shstrndx

    // Section 0: the null section.
    out.extend([0; 64]);

    // Section 1: .shstrtab.
    out.extend(1u32.to_le_bytes()); // sh_name
    out.extend(3u32.to_le_bytes()); // sh_type = SHT_STRTAB
    out.extend(0u64.to_le_bytes()); // sh_flags
    out.extend(0u64.to_le_bytes()); // sh_addr
    out.extend(192u64.to_le_bytes()); // sh_offset
    out.extend((shstrtab.len() as u64).to_le_bytes()); // sh_size
    out.extend(0u32.to_le_bytes()); // sh_link
    out.extend(0u32.to_le_bytes()); // sh_info
    out.extend(1u64.to_le_bytes()); // sh_addralign
    out.extend(0u64.to_le_bytes()); // sh_entsize

    assert_eq!(out.len(), 192);
    out.extend(shstrtab);
    out
}

#[test]
fn test_check_file_reports_missing_sections() {
    let elf = minimal_elf();

    let config = CheckConfig::default();
    let (diag, sink) = capture(&config);
    check_file(&elf, &diag, &config, None);

    assert_eq!(
        sink.contents(),
        "error: .debug_abbrev data not found.\n\
         error: .debug_pubnames: data not found.\n\
         error: .debug_line: data not found.\n"
    );
}

#[test]
fn test_check_file_ignore_missing() {
    let elf = minimal_elf();

    let config = CheckConfig {
        ignore_missing: true,
        ..CheckConfig::default()
    };
    let (diag, sink) = capture(&config);
    check_file(&elf, &diag, &config, None);

    assert_eq!(sink.contents(), "");
    assert_eq!(diag.error_count(), 0);
}
