//! Loader for `.debug_abbrev`.
//!
//! The section is a sequence of abbreviation tables, each terminated by a
//! zero code; a run of two or more consecutive zero codes is section-wide
//! padding. Attribute name/form pairs are validated here once so the DIE
//! walk can rely on them, with the per-attribute form-class rules applied
//! to `DW_AT_sibling`, the location-class attributes, `DW_AT_ranges` /
//! `DW_AT_stmt_list` and the `low_pc`/`high_pc` pair.

use std::cell::Cell;

use gimli::constants as dw;

use crate::messages::{checked_uleb128, Category, Diagnostics, SectionId, Where};
use crate::readctx::ReadCtx;

/// One attribute of an abbreviation: name, form, and the site where the
/// pair was declared.
#[derive(Clone, Debug)]
pub struct AbbrevAttrib {
    pub name: u16,
    pub form: u8,
    pub wh: Where,
}

/// One abbreviation.
#[derive(Clone, Debug)]
pub struct Abbrev {
    pub code: u64,
    pub tag: u16,
    pub has_children: bool,
    pub attribs: Vec<AbbrevAttrib>,
    pub wh: Where,
    /// Whether some DIE uses this abbrev.
    pub used: Cell<bool>,
}

/// One abbreviation table, keyed by its starting offset in the section.
#[derive(Clone, Debug)]
pub struct AbbrevTable {
    pub offset: u64,
    /// Sorted by code once the table is closed.
    pub abbrevs: Vec<Abbrev>,
}

impl AbbrevTable {
    pub fn find(&self, code: u64) -> Option<&Abbrev> {
        self.abbrevs
            .binary_search_by_key(&code, |ab| ab.code)
            .ok()
            .map(|i| &self.abbrevs[i])
    }
}

pub(crate) fn form_valid(form: u64) -> bool {
    form > 0 && form <= u64::from(dw::DW_FORM_indirect.0)
}

pub(crate) fn is_location_attrib(at: dw::DwAt) -> bool {
    at == dw::DW_AT_location
        || at == dw::DW_AT_frame_base
        || at == dw::DW_AT_data_location
        || at == dw::DW_AT_data_member_location
}

/// Verdict on a form used with `DW_AT_sibling`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SiblingForm {
    Ok,
    /// Legal but global; a CU-local reference would do.
    RefAddr,
    NonRef,
}

pub(crate) fn check_sibling_form(form: dw::DwForm) -> SiblingForm {
    // Indirect is tolerated here; the dereferenced form is re-checked
    // during the DIE walk.
    if form == dw::DW_FORM_indirect
        || form == dw::DW_FORM_ref1
        || form == dw::DW_FORM_ref2
        || form == dw::DW_FORM_ref4
        || form == dw::DW_FORM_ref8
        || form == dw::DW_FORM_ref_udata
    {
        SiblingForm::Ok
    } else if form == dw::DW_FORM_ref_addr {
        SiblingForm::RefAddr
    } else {
        SiblingForm::NonRef
    }
}

/// Whether the form may carry a location-class attribute in some CU.
pub(crate) fn location_form_ok(form: dw::DwForm) -> bool {
    form == dw::DW_FORM_indirect
        // loclistptr
        || form == dw::DW_FORM_data4
        || form == dw::DW_FORM_data8
        // block
        || form == dw::DW_FORM_block1
        || form == dw::DW_FORM_block2
        || form == dw::DW_FORM_block4
        || form == dw::DW_FORM_block
}

/// Loads all abbreviation tables from the section. Returns `None` on a
/// fatal parse error; whatever was loaded so far is discarded, exactly like
/// the dependent `.debug_info` pass would want it.
pub fn load_abbrevs(ctx: &mut ReadCtx<'_>, diag: &Diagnostics) -> Option<Vec<AbbrevTable>> {
    let mut tables: Vec<AbbrevTable> = Vec::new();
    let mut open: Option<usize> = None;
    let mut first_attr_off: Option<u64> = None;
    let mut wh = Where::new(SectionId::Abbrev);
    wh.reset_1(0);

    while !ctx.eof() {
        let mut abbr_off;
        let abbr_code;
        {
            let mut prev_code: Option<u64> = None;
            let mut zero_seq_off: Option<u64> = None;

            loop {
                abbr_off = ctx.offset();
                match open {
                    Some(i) => {
                        wh.reset_1(tables[i].offset);
                        wh.reset_2(tables[i].abbrevs.len() as u64 + 1);
                    }
                    None => {
                        wh.reset_1(abbr_off);
                        wh.reset_2(1);
                    }
                }

                let code = checked_uleb128(ctx, diag, &wh, "abbrev code")?;

                if code == 0 && prev_code == Some(0) && zero_seq_off.is_none() {
                    zero_seq_off = Some(abbr_off);
                }

                if code != 0 {
                    abbr_code = code;
                    break;
                }
                open = None;

                prev_code = Some(code);
                if ctx.eof() {
                    abbr_code = 0;
                    break;
                }
            }

            if let Some(zero_off) = zero_seq_off {
                // Section-wide padding, don't report an abbrev address.
                let end = if abbr_code == 0 { ctx.offset() } else { abbr_off };
                diag.padding_zero(
                    Category::ABBREVS | Category::HEADER,
                    &Where::new(SectionId::Abbrev),
                    zero_off,
                    end,
                );
            }
        }

        if abbr_code == 0 && ctx.eof() {
            break;
        }

        let table_idx = match open {
            Some(i) => i,
            None => {
                tables.push(AbbrevTable {
                    offset: abbr_off,
                    abbrevs: Vec::new(),
                });
                let i = tables.len() - 1;
                open = Some(i);
                wh.reset_1(abbr_off);
                wh.reset_2(1);
                i
            }
        };

        // The table is only sorted once it is closed; scan linearly here.
        let duplicate = tables[table_idx]
            .abbrevs
            .iter()
            .find(|ab| ab.code == abbr_code)
            .map(|orig| orig.wh.clone());
        if let Some(orig_wh) = &duplicate {
            diag.error(
                &wh,
                format_args!(
                    "duplicate abbrev code {abbr_code}; already defined at {orig_wh}."
                ),
            );
        }

        let mut cur = Abbrev {
            code: abbr_code,
            tag: 0,
            has_children: false,
            attribs: Vec::new(),
            wh: wh.clone(),
            used: Cell::new(false),
        };

        // Abbreviation tag.
        let abbr_tag = checked_uleb128(ctx, diag, &wh, "abbrev tag")?;
        if abbr_tag > u64::from(dw::DW_TAG_hi_user.0) {
            diag.error(&wh, format_args!("invalid abbrev tag {abbr_tag:#x}."));
            return None;
        }
        cur.tag = abbr_tag as u16;

        // Abbreviation has_children.
        let has_children = match ctx.read_u8() {
            Some(byte) => byte,
            None => {
                diag.error(&wh, format_args!("can't read abbrev has_children."));
                return None;
            }
        };
        if has_children != dw::DW_CHILDREN_no.0 && has_children != dw::DW_CHILDREN_yes.0 {
            diag.error(
                &wh,
                format_args!("invalid has_children value {has_children:#x}."),
            );
            return None;
        }
        cur.has_children = has_children == dw::DW_CHILDREN_yes.0;

        let mut sibling_attr: Option<u64> = None;
        let mut low_pc = false;
        let mut high_pc = false;
        let mut ranges = false;

        loop {
            let attr_off = ctx.offset();
            let base = *first_attr_off.get_or_insert(attr_off);
            // Attribute coordinates are relative to the first attribute in
            // the section.
            wh.reset_3(attr_off - base);

            let attrib_name = checked_uleb128(ctx, diag, &wh, "attribute name")?;
            let attrib_form = checked_uleb128(ctx, diag, &wh, "attribute form")?;

            // Both zero closes the attribute list.
            if attrib_name == 0 && attrib_form == 0 {
                break;
            }

            if attrib_name > u64::from(dw::DW_AT_hi_user.0) {
                diag.error(&wh, format_args!("invalid name {attrib_name:#x}."));
                return None;
            }
            if !form_valid(attrib_form) {
                diag.error(&wh, format_args!("invalid form {attrib_form:#x}."));
                return None;
            }

            let at = dw::DwAt(attrib_name as u16);
            let form = dw::DwForm(attrib_form as u16);

            if at == dw::DW_AT_sibling {
                // At most one sibling attribute per abbrev, CU-local
                // reference form expected; the DIE walk builds on this.
                match sibling_attr {
                    Some(first) => diag.error(
                        &wh,
                        format_args!(
                            "Another DW_AT_sibling attribute in one abbreviation. \
                             (First was {first:#x}.)"
                        ),
                    ),
                    None => {
                        sibling_attr = Some(attr_off);
                        if !cur.has_children {
                            diag.message(
                                Category::DIE_REL | Category::ACC_BLOAT | Category::IMPACT_1,
                                &wh,
                                format_args!(
                                    "Excessive DW_AT_sibling attribute at childless abbrev."
                                ),
                            );
                        }
                    }
                }

                match check_sibling_form(form) {
                    SiblingForm::Ok => {}
                    SiblingForm::RefAddr => diag.message(
                        Category::DIE_REL | Category::IMPACT_2,
                        &wh,
                        format_args!("DW_AT_sibling attribute with form DW_FORM_ref_addr."),
                    ),
                    SiblingForm::NonRef => diag.error(
                        &wh,
                        format_args!(
                            "DW_AT_sibling attribute with non-reference form \"{form}\"."
                        ),
                    ),
                }
            } else if is_location_attrib(at) {
                if !location_form_ok(form) {
                    diag.error(&wh, format_args!("{at} with invalid form \"{form}\"."));
                }
            } else if at == dw::DW_AT_ranges || at == dw::DW_AT_stmt_list {
                if form != dw::DW_FORM_data4
                    && form != dw::DW_FORM_data8
                    && form != dw::DW_FORM_indirect
                {
                    diag.error(&wh, format_args!("{at} with invalid form \"{form}\"."));
                }
                if at == dw::DW_AT_ranges {
                    ranges = true;
                }
            } else if at == dw::DW_AT_low_pc || at == dw::DW_AT_high_pc {
                if form != dw::DW_FORM_addr && form != dw::DW_FORM_ref_addr {
                    diag.error(&wh, format_args!("{at} with invalid form \"{form}\"."));
                }
                if at == dw::DW_AT_low_pc {
                    low_pc = true;
                } else {
                    high_pc = true;
                }
            }

            cur.attribs.push(AbbrevAttrib {
                name: attrib_name as u16,
                form: attrib_form as u8,
                wh: wh.clone(),
            });
        }

        // Drop the attribute coordinate again.
        wh.reset_2(tables[table_idx].abbrevs.len() as u64 + 1);
        if high_pc && !low_pc {
            diag.error(
                &wh,
                format_args!("the abbrev has DW_AT_high_pc without also having DW_AT_low_pc."),
            );
        } else if high_pc && ranges {
            diag.error(
                &wh,
                format_args!(
                    "the abbrev has DW_AT_high_pc & DW_AT_low_pc, but also has DW_AT_ranges."
                ),
            );
        }

        // Don't save duplicates; the first definition wins.
        if duplicate.is_none() {
            tables[table_idx].abbrevs.push(cur);
        }
    }

    // The tables are most likely already sorted in the file, but make sure,
    // code lookup during the DIE walk is a binary search.
    for table in &mut tables {
        table.abbrevs.sort_by_key(|ab| ab.code);
    }

    Some(tables)
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

    fn abbrev(code: u64, tag: u64, children: u8, attrs: &[(u64, u64)]) -> Vec<u8> {
        let mut out = uleb(code);
        out.extend(uleb(tag));
        out.push(children);
        for &(name, form) in attrs {
            out.extend(uleb(name));
            out.extend(uleb(form));
        }
        out.extend([0, 0]);
        out
    }

    #[test]
    fn test_load_simple_table() {
        let mut data = abbrev(1, 0x11, 1, &[(0x03, 0x08)]); // compile_unit, name/string
        data.extend(abbrev(2, 0x24, 0, &[(0x03, 0x08)])); // base_type
        data.push(0);

        let (diag, sink) = capture();
        let mut ctx = ReadCtx::new(&data, true);
        let tables = load_abbrevs(&mut ctx, &diag).unwrap();

        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].offset, 0);
        assert_eq!(tables[0].abbrevs.len(), 2);
        assert!(tables[0].find(1).is_some());
        assert!(tables[0].find(2).is_some());
        assert!(tables[0].find(3).is_none());
        assert_eq!(sink.contents(), "");
    }

    #[test]
    fn test_duplicate_code() {
        let mut data = abbrev(1, 0x24, 0, &[(0x03, 0x0e)]);
        data.extend(abbrev(1, 0x24, 0, &[(0x03, 0x0e)]));
        data.push(0);

        let (diag, sink) = capture();
        let mut ctx = ReadCtx::new(&data, true);
        let tables = load_abbrevs(&mut ctx, &diag).unwrap();

        assert_eq!(
            sink.contents(),
            "error: .debug_abbrev: section 0: abbreviation 2: duplicate abbrev code 1; \
             already defined at .debug_abbrev: section 0: abbreviation 1.\n"
        );
        // The duplicate is dropped.
        assert_eq!(tables[0].abbrevs.len(), 1);
    }

    #[test]
    fn test_second_table_starts_after_terminator() {
        let mut data = abbrev(1, 0x11, 0, &[]);
        data.push(0); // end of first table
        let second_off = data.len() as u64;
        data.extend(abbrev(1, 0x24, 0, &[]));
        data.push(0);

        let (diag, _sink) = capture();
        let mut ctx = ReadCtx::new(&data, true);
        let tables = load_abbrevs(&mut ctx, &diag).unwrap();

        assert_eq!(tables.len(), 2);
        assert_eq!(tables[1].offset, second_off);
    }

    #[test]
    fn test_zero_run_is_padding() {
        let mut data = abbrev(1, 0x11, 0, &[]);
        data.extend([0, 0, 0, 0]); // terminator plus three bytes of padding

        let (diag, sink) = capture();
        let mut ctx = ReadCtx::new(&data, true);
        load_abbrevs(&mut ctx, &diag).unwrap();

        assert!(sink
            .contents()
            .contains("unnecessary padding with zero bytes"));
        assert_eq!(diag.error_count(), 1);
    }

    #[test]
    fn test_sibling_rules() {
        // Childless abbrev with a sibling attribute in a non-reference form.
        let mut data = abbrev(1, 0x2e, 0, &[(0x01, 0x0b)]); // sibling/data1
        data.push(0);

        let (diag, sink) = capture();
        let mut ctx = ReadCtx::new(&data, true);
        load_abbrevs(&mut ctx, &diag).unwrap();

        let out = sink.contents();
        assert!(out.contains("Excessive DW_AT_sibling attribute at childless abbrev."));
        assert!(out.contains(
            "DW_AT_sibling attribute with non-reference form \"DW_FORM_data1\"."
        ));
    }

    #[test]
    fn test_high_pc_without_low_pc() {
        let mut data = abbrev(1, 0x2e, 0, &[(0x12, 0x01)]); // high_pc/addr
        data.push(0);

        let (diag, sink) = capture();
        let mut ctx = ReadCtx::new(&data, true);
        load_abbrevs(&mut ctx, &diag).unwrap();

        assert!(sink
            .contents()
            .contains("the abbrev has DW_AT_high_pc without also having DW_AT_low_pc."));
    }

    #[test]
    fn test_invalid_tag_is_fatal() {
        let mut data = uleb(1);
        data.extend(uleb(0x10000)); // above DW_TAG_hi_user
        data.push(0);

        let (diag, _sink) = capture();
        let mut ctx = ReadCtx::new(&data, true);
        assert!(load_abbrevs(&mut ctx, &diag).is_none());
        assert_eq!(diag.error_count(), 1);
    }
}
