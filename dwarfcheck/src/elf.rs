//! The ELF container scan.
//!
//! [`ElfFile`] is the checker's view of one input object: the section table
//! with known debug sections identified, their raw bytes, the symbol table,
//! and per-section relocation streams. It is built from raw bytes via
//! goblin, or assembled directly from parts in tests.
//!
//! For `ET_REL` inputs the scan also simulates in-memory layout
//! ([`ElfFile::layout_rel`]): `SHF_ALLOC` sections without an address are
//! assigned the next aligned spot, so that later coverage comparisons
//! between ranges and sections can assume a flat address space.

use std::error::Error;

use goblin::elf::section_header::{SHF_ALLOC, SHT_NOBITS, SHT_RELA};
use thiserror::Error;

use crate::messages::{Category, Diagnostics, SectionId, Where};
use crate::reloc::{read_rel, RawReloc, RelocData};

pub const SHN_UNDEF: usize = 0;
pub const SHN_ABS: usize = 0xfff1;
pub const SHN_COMMON: usize = 0xfff2;

/// An error when the container itself cannot be parsed.
#[derive(Debug, Error)]
#[error("invalid ELF file")]
pub struct ScanError {
    #[source]
    source: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl ScanError {
    fn new<E>(source: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        let source = Some(source.into());
        Self { source }
    }
}

/// One symbol from the symbol table the relocation sections link to.
#[derive(Clone, Copy, Debug, Default)]
pub struct ElfSymbol {
    pub value: u64,
    pub shndx: usize,
    pub info: u8,
}

impl ElfSymbol {
    pub fn st_type(&self) -> u8 {
        self.info & 0xf
    }
}

/// One section of the scanned file.
#[derive(Debug)]
pub struct ElfSection<'data> {
    pub name: String,
    /// Set when the section is one of the known `.debug_*` sections.
    pub id: Option<SectionId>,
    pub sh_type: u32,
    pub sh_flags: u64,
    pub sh_addr: u64,
    pub sh_offset: u64,
    pub sh_size: u64,
    pub sh_link: u32,
    pub sh_info: u32,
    pub sh_addralign: u64,
    pub data: Option<&'data [u8]>,
    pub rel: Option<RelocData>,
}

impl<'data> ElfSection<'data> {
    /// A blank section; tests fill in what they need.
    pub fn new(name: &str) -> Self {
        ElfSection {
            name: name.to_string(),
            id: SectionId::from_name(name),
            sh_type: 0,
            sh_flags: 0,
            sh_addr: 0,
            sh_offset: 0,
            sh_size: 0,
            sh_link: 0,
            sh_info: 0,
            sh_addralign: 0,
            data: None,
            rel: None,
        }
    }
}

/// The checker's view of one ELF object.
#[derive(Debug)]
pub struct ElfFile<'data> {
    pub little_endian: bool,
    pub is_64: bool,
    pub etype: u16,
    pub machine: u16,
    /// All sections in header-table order; index 0 is the null section.
    pub sections: Vec<ElfSection<'data>>,
    pub symbols: Vec<ElfSymbol>,
}

impl<'data> ElfFile<'data> {
    /// Tests whether the buffer could contain an ELF object.
    pub fn test(data: &[u8]) -> bool {
        data.get(0..goblin::elf::header::SELFMAG)
            .map_or(false, |data| data == goblin::elf::header::ELFMAG)
    }

    /// A file with no sections beyond the null entry. Tests build on this.
    pub fn empty(little_endian: bool, is_64: bool, etype: u16, machine: u16) -> Self {
        ElfFile {
            little_endian,
            is_64,
            etype,
            machine,
            sections: vec![ElfSection::new("")],
            symbols: Vec::new(),
        }
    }

    pub fn is_rel(&self) -> bool {
        self.etype == goblin::elf::header::ET_REL
    }

    /// The known debug section with the given identifier, if present.
    pub fn debug_section(&self, id: SectionId) -> Option<&ElfSection<'data>> {
        self.sections.iter().find(|sec| sec.id == Some(id))
    }

    /// Like [`debug_section`](Self::debug_section), but only when the
    /// section also has data.
    pub fn debug_section_data(&self, id: SectionId) -> Option<&ElfSection<'data>> {
        self.debug_section(id).filter(|sec| sec.data.is_some())
    }

    pub fn section_by_name(&self, name: &str) -> Option<&ElfSection<'data>> {
        self.sections.iter().find(|sec| sec.name == name)
    }

    /// Parses an ELF object and identifies the debug sections and their
    /// relocation companions. Container-level problems are reported through
    /// `diag`; only an unreadable container fails.
    pub fn parse(data: &'data [u8], diag: &Diagnostics) -> Result<Self, ScanError> {
        let elf = goblin::elf::Elf::parse(data).map_err(ScanError::new)?;

        let mut file = ElfFile {
            little_endian: elf.little_endian,
            is_64: elf.is_64,
            etype: elf.header.e_type,
            machine: elf.header.e_machine,
            sections: Vec::with_capacity(elf.section_headers.len()),
            symbols: elf
                .syms
                .iter()
                .map(|sym| ElfSymbol {
                    value: sym.st_value,
                    shndx: sym.st_shndx,
                    info: sym.st_info,
                })
                .collect(),
        };

        for (idx, shdr) in elf.section_headers.iter().enumerate() {
            let name = elf
                .shdr_strtab
                .get_at(shdr.sh_name)
                .unwrap_or_default()
                .to_string();

            let mut sec = ElfSection {
                id: if idx == 0 {
                    None
                } else {
                    SectionId::from_name(&name)
                },
                name,
                sh_type: shdr.sh_type,
                sh_flags: shdr.sh_flags,
                sh_addr: shdr.sh_addr,
                sh_offset: shdr.sh_offset,
                sh_size: shdr.sh_size,
                sh_link: shdr.sh_link,
                sh_info: shdr.sh_info,
                sh_addralign: shdr.sh_addralign,
                data: None,
                rel: None,
            };

            if idx > 0 && !crate::coverage::address_aligned(sec.sh_addr, sec.sh_addralign) {
                diag.error_plain(format_args!(
                    "Base address of section {}, {:#x}, should have an alignment of {}.",
                    sec.name, sec.sh_addr, sec.sh_addralign
                ));
            }

            if sec.sh_type != SHT_NOBITS {
                let offset = sec.sh_offset as usize;
                let size = sec.sh_size as usize;
                sec.data = data.get(offset..offset.saturating_add(size));
            }

            // Only the first occurrence of a debug section name counts.
            if let Some(id) = sec.id {
                if file.sections.iter().any(|other| other.id == Some(id)) {
                    diag.error_plain(format_args!(
                        "Multiple occurrences of section {}.",
                        sec.name
                    ));
                    sec.id = None;
                }
            }

            file.sections.push(sec);
        }

        file.attach_relocations(&elf, diag);

        Ok(file)
    }

    /// Finds the `SHT_REL`/`SHT_RELA` sections whose info-link points at a
    /// known debug section and attaches their entry streams.
    fn attach_relocations(&mut self, elf: &goblin::elf::Elf<'_>, diag: &Diagnostics) {
        struct Pending {
            target: usize,
            source: usize,
            is_rela: bool,
            raw: Vec<RawReloc>,
        }

        let mut pending: Vec<Pending> = Vec::new();
        let mut reloc_symtab: Option<u32> = None;

        for (src_idx, relocs) in &elf.shdr_relocs {
            let src = match self.sections.get(*src_idx) {
                Some(src) => src,
                None => continue,
            };
            let target_idx = src.sh_info as usize;
            let target = match self.sections.get(target_idx) {
                Some(sec) if sec.id.is_some() => sec,
                _ => continue,
            };

            if pending.iter().any(|p| p.target == target_idx) {
                diag.error_plain(format_args!(
                    "Several relocation sections for debug section {}.  Ignoring {}.",
                    target.name, src.name
                ));
                continue;
            }

            if src.data.is_none() {
                diag.error_plain(format_args!("Data-less relocation section {}.", src.name));
                continue;
            }

            match reloc_symtab {
                None => reloc_symtab = Some(src.sh_link),
                Some(link) if link != src.sh_link => {
                    diag.error_plain(format_args!(
                        "Relocation sections use multiple symbol tables."
                    ));
                }
                Some(_) => {}
            }

            pending.push(Pending {
                target: target_idx,
                source: *src_idx,
                is_rela: src.sh_type == SHT_RELA,
                raw: relocs
                    .iter()
                    .map(|r| RawReloc {
                        offset: r.r_offset,
                        symndx: r.r_sym,
                        rtype: r.r_type,
                        addend: r.r_addend,
                    })
                    .collect(),
            });
        }

        let have_symdata = !self.symbols.is_empty();
        if !pending.is_empty() && !have_symdata {
            // Not a show stopper, a lot can be checked without a symbol
            // table.
            diag.error_plain(format_args!("Couldn't obtain symtab data."));
        }

        for p in pending {
            let target = &self.sections[p.target];
            let id = match target.id {
                Some(id) => id,
                None => continue,
            };

            let sec_data = match target.data {
                Some(data) => data,
                None => {
                    diag.error(
                        &Where::new(id),
                        format_args!("this data-less section has a relocation section."),
                    );
                    continue;
                }
            };

            tracing::debug!(
                section = %target.name,
                source = %self.sections[p.source].name,
                entries = p.raw.len(),
                "attaching relocations"
            );

            let mut rel = read_rel(
                self.machine,
                self.little_endian,
                id,
                sec_data,
                &p.raw,
                p.is_rela,
                diag,
            );
            rel.symtab = have_symdata;

            if id == SectionId::Str {
                diag.message(
                    Category::IMPACT_2 | Category::ELF,
                    &Where::new(SectionId::Str),
                    format_args!("there's a relocation section associated with this section."),
                );
            }

            self.sections[p.target].rel = Some(rel);
        }
    }

    /// Simulates in-memory layout for `ET_REL` files: walks `SHF_ALLOC`
    /// sections in link order and assigns each address-less section the next
    /// aligned offset. When a later section's alignment shows the chosen
    /// base wastes padding, the layout restarts at a realigned base and the
    /// earlier sections move.
    pub fn layout_rel(&mut self) {
        if !self.is_rel() {
            return;
        }

        let mut base: u64 = 0;
        let mut start: u64 = 0;
        let mut end: u64 = 0;
        let mut bias: u64 = 0;
        let mut first = true;

        let align_of = |sec: &ElfSection<'_>| -> u64 {
            let align = sec.sh_addralign;
            if align.is_power_of_two() {
                align
            } else {
                1
            }
        };
        let align_up = |addr: u64, align: u64| -> u64 { (addr + align - 1) & !(align - 1) };

        'sections: for i in 1..self.sections.len() {
            if self.sections[i].sh_flags & u64::from(SHF_ALLOC) == 0 {
                continue;
            }

            let align = align_of(&self.sections[i]);
            let next = align_up(end, align);
            let sh_addr = self.sections[i].sh_addr;

            // Once layout has started it has to cover everything, unless the
            // first section already sat at zero.
            if sh_addr == 0 || (bias == 0 && end > start && end != next) {
                self.sections[i].sh_addr = next;

                if end == base {
                    // The first section assigned a location; its aligned
                    // address becomes the module's base.
                    start = next;
                    base = next;
                } else if base & (align - 1) != 0 {
                    // BASE has less than this section's alignment, which
                    // costs more than the optimal amount of padding. Restart
                    // the layout with a better base.
                    base = align_up(base, align);
                    start = base;
                    end = base;
                    for j in 1..=i {
                        if self.sections[j].sh_flags & u64::from(SHF_ALLOC) == 0 {
                            continue;
                        }
                        let prev_align = align_of(&self.sections[j]);
                        let addr = align_up(end, prev_align);
                        self.sections[j].sh_addr = addr;
                        end = addr + self.sections[j].sh_size;
                    }
                    continue 'sections;
                }

                end = self.sections[i].sh_addr + self.sections[i].sh_size;
            } else {
                // The address is already assigned, just track it.
                let sh_size = self.sections[i].sh_size;
                if first || end < sh_addr + sh_size {
                    end = sh_addr + sh_size;
                }
                if first || bias > sh_addr {
                    // The lowest address in the module.
                    bias = sh_addr;
                }

                if (sh_addr - bias + base) & (align - 1) != 0 {
                    // This section winds up misaligned using BASE; adjust it
                    // upwards to make it congruent to the lowest section
                    // address modulo ALIGN.
                    base = align_up(base, align) + (bias & (align - 1));
                }
            }

            first = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use goblin::elf::header::{EM_X86_64, ET_REL};

    fn alloc_section(name: &str, size: u64, align: u64, addr: u64) -> ElfSection<'static> {
        let mut sec = ElfSection::new(name);
        sec.sh_flags = u64::from(SHF_ALLOC);
        sec.sh_size = size;
        sec.sh_addralign = align;
        sec.sh_addr = addr;
        sec
    }

    #[test]
    fn test_layout_rel_assigns_addresses() {
        let mut file = ElfFile::empty(true, true, ET_REL, EM_X86_64);
        file.sections.push(alloc_section(".text", 0x13, 16, 0));
        file.sections.push(alloc_section(".data", 0x8, 8, 0));
        file.sections.push(alloc_section(".bss", 0x4, 4, 0));

        file.layout_rel();

        assert_eq!(file.sections[1].sh_addr, 0);
        // 0x13 rounded up to the next 8-aligned offset.
        assert_eq!(file.sections[2].sh_addr, 0x18);
        assert_eq!(file.sections[3].sh_addr, 0x20);
    }

    #[test]
    fn test_layout_rel_ignores_non_alloc() {
        let mut file = ElfFile::empty(true, true, ET_REL, EM_X86_64);
        file.sections.push(alloc_section(".text", 0x10, 4, 0));
        let mut debug = ElfSection::new(".debug_info");
        debug.sh_size = 0x100;
        file.sections.push(debug);
        file.sections.push(alloc_section(".data", 0x10, 4, 0));

        file.layout_rel();

        assert_eq!(file.sections[2].sh_addr, 0);
        assert_eq!(file.sections[3].sh_addr, 0x10);
    }

    #[test]
    fn test_layout_skips_non_rel_files() {
        let mut file = ElfFile::empty(true, true, goblin::elf::header::ET_EXEC, EM_X86_64);
        file.sections.push(alloc_section(".text", 0x10, 4, 0));
        file.layout_rel();
        assert_eq!(file.sections[1].sh_addr, 0);
    }

    #[test]
    fn test_debug_section_lookup() {
        let mut file = ElfFile::empty(true, true, ET_REL, EM_X86_64);
        let mut sec = ElfSection::new(".debug_info");
        sec.data = Some(&[]);
        file.sections.push(sec);

        assert!(file.debug_section(SectionId::Info).is_some());
        assert!(file.debug_section_data(SectionId::Info).is_some());
        assert!(file.debug_section(SectionId::Line).is_none());
        assert!(file.section_by_name(".debug_info").is_some());
    }
}
