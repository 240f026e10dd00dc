mod common;

use sctools::assembler::{
    self,
    phases::{
        generate::{self, Constant, Field},
        resolve, tokenize,
        types::{Loc, Located},
    },
    AssemblerOptions, Error,
};
use sctools::isa::IsaKind;
use sctools::script::{natives, SegmentKind, PAGE_LENGTH};

fn assemble_err(isa: IsaKind, src: &str) -> Error {
    assembler::assemble(src, &AssemblerOptions::with_isa(isa)).unwrap_err()
}

#[test]
fn small_function() {
    assert_eq!(
        common::code(
            IsaKind::Five,
            ".code\nmain:\nPUSH_CONST_1\nPUSH_CONST_2\nIADD\nLEAVE 0,0"
        ),
        vec![0x6F, 0x70, 0x01, 0x2E, 0x00, 0x00]
    );
}

#[test]
fn relative_jump_counts_from_the_next_instruction() {
    let src = "
        .code
            J @end
            PUSH_CONST_U8 1
            PUSH_CONST_U8 2
            PUSH_CONST_1
        end:
            LEAVE 0, 0
    ";
    assert_eq!(
        common::code(IsaKind::Five, src),
        vec![0x55, 0x05, 0x00, 0x25, 0x01, 0x25, 0x02, 0x6F, 0x2E, 0x00, 0x00]
    );
}

#[test]
fn backward_jump() {
    let src = "
        top:
            NOP
            JZ @top
    ";
    // -4 from the end of the jump
    assert_eq!(common::code(IsaKind::Five, src), vec![0x00, 0x56, 0xFC, 0xFF]);
}

#[test]
fn label_too_far() {
    let src = format!(".code\nJ @end\n{}end:\n", "NOP\n".repeat(40_000));
    assert_eq!(
        assemble_err(IsaKind::Five, &src),
        Error::Resolve(Located::with_loc(
            Loc::new(2, 3),
            resolve::Error::LabelTooFar {
                label: "end".to_owned(),
                distance: 40_000,
            }
        ))
    );
}

#[test]
fn switch_cases_are_six_bytes() {
    let src = "
        SWITCH 1:@a, 2:@b
        a:
        b:
            LEAVE 0, 0
    ";
    let code = common::code(IsaKind::Five, src);
    assert_eq!(code.len(), 2 + 6 * 2 + 3);
    assert_eq!(
        code,
        vec![
            0x62, 0x02, //
            0x01, 0x00, 0x00, 0x00, 0x06, 0x00, //
            0x02, 0x00, 0x00, 0x00, 0x00, 0x00, //
            0x2E, 0x00, 0x00,
        ]
    );
}

#[test]
fn too_many_switch_cases() {
    let cases: Vec<String> = (0..256).map(|i| format!("{}:@a", i)).collect();
    let src = format!("SWITCH {}\na:\n", cases.join(", "));
    assert_eq!(
        assemble_err(IsaKind::Five, &src),
        Error::Generate(Located::with_loc(
            Loc::new(1, 1),
            generate::Error::TooManySwitchCases(256)
        ))
    );
}

#[test]
fn enter_embeds_the_preceding_label() {
    let src = "
        main:
            ENTER 0, 2
            LEAVE 0, 0
        ENTER 1, 2, \"named\"
            LEAVE 1, 0
        quiet:
            ENTER 0, 0, \"\"
            LEAVE 0, 0
    ";
    #[rustfmt::skip]
    let expected = vec![
        0x2D, 0x00, 0x02, 0x00, 0x05, b'm', b'a', b'i', b'n', 0x00,
        0x2E, 0x00, 0x00,
        0x2D, 0x01, 0x02, 0x00, 0x06, b'n', b'a', b'm', b'e', b'd', 0x00,
        0x2E, 0x01, 0x00,
        0x2D, 0x00, 0x00, 0x00, 0x00,
        0x2E, 0x00, 0x00,
    ];
    assert_eq!(common::code(IsaKind::Five, src), expected);

    let options = AssemblerOptions {
        include_function_names: false,
        ..AssemblerOptions::default()
    };
    let unnamed = assembler::assemble("main:\nENTER 0, 2", &options).unwrap();
    assert_eq!(unnamed.script.code.flatten(), vec![0x2D, 0x00, 0x02, 0x00, 0x00]);
}

#[test]
fn enter_embeds_the_closest_label_before_it() {
    assert_eq!(
        common::code(IsaKind::Five, "func:\nNOP\nENTER 0, 2"),
        vec![0x00, 0x2D, 0x00, 0x02, 0x00, 0x05, b'f', b'u', b'n', b'c', 0x00]
    );
    // a segment switch in between does not forget it
    assert_eq!(
        common::code(IsaKind::Five, "f:\n.static\n.int 1\n.code\nENTER 0, 2"),
        vec![0x2D, 0x00, 0x02, 0x00, 0x02, b'f', 0x00]
    );
}

#[test]
fn labels_ignore_case() {
    assert_eq!(common::code(IsaKind::Five, "Done:\nJ @done"), vec![0x55, 0xFD, 0xFF]);
    assert_eq!(
        assemble_err(IsaKind::Five, "main:\nNOP\nMAIN:\nNOP"),
        Error::Generate(Located::with_loc(
            Loc::new(3, 1),
            generate::Error::DuplicateSymbol("MAIN".to_owned())
        ))
    );
}

#[test]
fn late_symbols_in_data() {
    let script = common::assemble(
        IsaKind::Five,
        ".global_block 1\n.global\n.int 5, later\n.static\n.int 0, 1, LATER\n.const later 9",
    );
    assert_eq!(script.globals.values(), vec![5, 9]);
    assert_eq!(script.statics.values(), vec![0, 1, 9]);
}

#[test]
fn switch_lengths_for_every_case_count() {
    for &(isa, case_len) in &[
        (IsaKind::Five, 6),
        (IsaKind::Rdr2, 6),
        (IsaKind::Ny, 8),
        (IsaKind::Payne, 8),
    ] {
        for n in 0..=255usize {
            let cases: Vec<String> = (0..n).map(|i| format!("{}:@done", i * 7)).collect();
            let src = format!("main:\nSWITCH {}\ndone:\nLEAVE 0, 0\n", cases.join(", "));
            let script = common::roundtrip(isa, &src);
            let code = script.code.flatten();
            assert_eq!(code.len(), case_len * n + 2 + 3, "{} with {} cases", isa, n);
            assert_eq!(code[1], n as u8);
        }
    }
}

#[test]
fn globals_span_pages_in_whole_values() {
    let src = format!(
        ".global_block 2\n.global\n.int {} dup (7)\nlast: .int64 0x1122334455667788\n.code\nGLOBAL_U24_LOAD last\n",
        PAGE_LENGTH
    );
    let script = common::roundtrip(IsaKind::Five, &src);
    let pages = script.globals.pages();
    assert_eq!(pages.len(), 2);
    assert_eq!(pages[0].len(), PAGE_LENGTH * 8);
    assert_eq!(pages[1], 0x1122_3344_5566_7788u64.to_le_bytes().to_vec());
    assert!(pages.iter().all(|page| page.len() % 8 == 0));
    // offset 0x4000 in block 2
    assert_eq!(&script.code.flatten()[1..4], &[0x00, 0x40, 0x08]);
}

#[test]
fn natives_are_rotated_and_deduplicated() {
    let src = "
        .include
        wait: .native 0x8000
        far:  .native 0x100000
              .native 0x8000
        .code
            NATIVE 1, 0, wait
            NATIVE 0, 1, far
            LEAVE 0, 0
    ";
    let script = common::assemble(IsaKind::Five, src);
    assert_eq!(
        script.code.flatten(),
        vec![0x2C, 0x04, 0x00, 0x00, 0x2C, 0x01, 0x00, 0x01, 0x2E, 0x00, 0x00]
    );
    // rotated right by (index + 11)
    assert_eq!(script.natives.values(), vec![0x10, 0x100]);
    assert_eq!(script.native_hashes(true), vec![0x8000, 0x10_0000]);
    assert_eq!(
        natives::rotate(0x8000, 0, script.code_length()),
        script.natives.values()[0]
    );
}

#[test]
fn code_pages_end_with_a_jump() {
    let src = format!(
        ".code\n{}next:\nPUSH_CONST_U32 1\nJ @next\n",
        "NOP\n".repeat(PAGE_LENGTH - 4)
    );
    let script = common::assemble(IsaKind::Five, &src);
    let pages = script.code.pages();
    assert_eq!(pages.len(), 2);
    assert_eq!(pages[0].len(), PAGE_LENGTH);
    assert_eq!(&pages[0][PAGE_LENGTH - 4..], &[0x55, 0x01, 0x00, 0x00]);
    // `next` keeps the address of the padding, which jumps onwards
    // 0x3FFC - (0x4006 + 2)
    let back = (-12i16).to_le_bytes();
    assert_eq!(pages[1], vec![0x28, 0x01, 0x00, 0x00, 0x00, 0x55, back[0], back[1]]);
}

#[test]
fn short_page_tails_are_zero_filled() {
    let src = format!("{}PUSH_CONST_S16 -2\n", "NOP\n".repeat(PAGE_LENGTH - 3));
    let script = common::assemble(IsaKind::Five, &src);
    let pages = script.code.pages();
    assert_eq!(&pages[0][PAGE_LENGTH - 3..], &[0x00, 0x00, 0x00]);
    assert_eq!(pages[1], vec![0x43, 0xFE, 0xFF]);
}

#[test]
fn control_flow_may_fill_a_page() {
    let src = format!("{}LEAVE 0, 0\n", "NOP\n".repeat(PAGE_LENGTH - 3));
    let script = common::assemble(IsaKind::Five, &src);
    assert_eq!(script.code.pages().len(), 1);
    assert_eq!(script.code_length(), PAGE_LENGTH);
}

#[test]
fn data_labels() {
    let src = "
        .global_block 3
        .global
        counter: .int 0
        flag:    .int 1
        .static
        s:       .int 2 dup (7)
        .arg
        a:       .int 9
        .string
                 .str \"x\"
        hello:   .str \"Hello\"
        .code
            GLOBAL_U24_LOAD flag
            STATIC_U8_LOAD a
            PUSH_CONST_U8 hello
            STRING
    ";
    let script = common::assemble(IsaKind::Five, src);
    assert_eq!(
        script.code.flatten(),
        vec![0x5F, 0x01, 0x00, 0x0C, 0x3B, 0x02, 0x25, 0x02, 0x63]
    );
    assert_eq!(script.globals_block, 3);
    assert_eq!(script.globals.values(), vec![0, 1]);
    assert_eq!(script.statics.values(), vec![7, 7, 9]);
    assert_eq!(script.statics_count(), 2);
    assert_eq!(script.args_count, 1);
    assert_eq!(script.strings.flatten(), b"x\0Hello\0".to_vec());
}

#[test]
fn constants() {
    let src = "
        .const LIMIT 200
        .const HALF 0.5
        .static
            .int LIMIT dup (LIMIT)
        .code
            PUSH_CONST_U8 LIMIT
            PUSH_CONST_F HALF
    ";
    let script = common::assemble(IsaKind::Five, src);
    assert_eq!(script.statics.values(), vec![200; 200]);
    assert_eq!(
        script.code.flatten(),
        vec![0x25, 200, 0x29, 0x00, 0x00, 0x00, 0x3F]
    );
}

#[test]
fn header_directives() {
    let src = "
        .script_name \"my script\"
        .script_hash 0xDEADBEEF
        .globals_signature 12
    ";
    let script = common::assemble(IsaKind::Five, src);
    assert_eq!(script.name, "my script");
    assert_eq!(script.hash, 0xDEAD_BEEF);
    assert_eq!(script.globals_signature, 12);
    assert_ne!(script.name_hash, 0);

    assert_eq!(
        assemble_err(IsaKind::Five, ".script_name a\n.script_name b"),
        Error::Generate(Located::with_loc(
            Loc::new(2, 1),
            generate::Error::DuplicateDirective("script_name".to_owned())
        ))
    );
}

#[test]
fn duplicate_label() {
    assert_eq!(
        assemble_err(IsaKind::Five, ".code\nmain:\nNOP\nmain:\nNOP"),
        Error::Generate(Located::with_loc(
            Loc::new(4, 1),
            generate::Error::DuplicateSymbol("main".to_owned())
        ))
    );
}

#[test]
fn labels_and_constants_share_names() {
    assert_eq!(
        assemble_err(IsaKind::Five, ".const x 1\n.static\nx: .int 0"),
        Error::Generate(Located::with_loc(
            Loc::new(3, 1),
            generate::Error::DuplicateSymbol("x".to_owned())
        ))
    );
}

#[test]
fn undefined_label() {
    assert_eq!(
        assemble_err(IsaKind::Five, ".code\nJ @nowhere"),
        Error::Resolve(Located::with_loc(
            Loc::new(2, 3),
            resolve::Error::UndefinedSymbol("nowhere".to_owned())
        ))
    );
}

#[test]
fn unknown_mnemonic() {
    assert_eq!(
        assemble_err(IsaKind::Five, ".code\nFOO 1"),
        Error::Generate(Located::with_loc(
            Loc::new(2, 1),
            generate::Error::UnknownMnemonic("FOO".to_owned())
        ))
    );
}

#[test]
fn operand_out_of_range() {
    assert_eq!(
        assemble_err(IsaKind::Five, "PUSH_CONST_U8 256"),
        Error::Generate(Located::with_loc(
            Loc::new(1, 15),
            generate::Error::OutOfRange {
                value: Constant::Int(256),
                field: Field::U8,
            }
        ))
    );
}

#[test]
fn globals_need_a_block() {
    assert_eq!(
        assemble_err(IsaKind::Five, ".global\n.int 1"),
        Error::Generate(Located::with_loc(
            Loc::new(1, 1),
            generate::Error::GlobalBlockNotSet
        ))
    );
}

#[test]
fn lexical_errors_are_reported_together() {
    assert_eq!(
        assemble_err(IsaKind::Five, "NOP \"open\nPUSH_CONST_U8 12ab"),
        Error::Tokenize(vec![
            Located::with_loc(Loc::new(1, 5), tokenize::Error::UnterminatedString),
            Located::with_loc(
                Loc::new(2, 15),
                tokenize::Error::MalformedNumber("12ab".to_owned())
            ),
        ])
    );
}

#[test]
fn predefined_symbols() {
    let src = "
        #ifdef DEBUG
            PUSH_CONST_1
        #else
            PUSH_CONST_2
        #endif
    ";
    let debug = AssemblerOptions {
        defines: vec!["DEBUG".to_owned()],
        ..AssemblerOptions::default()
    };
    assert_eq!(
        assembler::assemble(src, &debug).unwrap().script.code.flatten(),
        vec![0x6F]
    );
    assert_eq!(common::code(IsaKind::Five, src), vec![0x70]);
}

#[test]
fn ny_switch_and_calls_are_absolute() {
    let src = "
            SWITCH 5:@a
        a:
            CALL @a
            LEAVE 0, 0
    ";
    assert_eq!(
        common::code(IsaKind::Ny, src),
        vec![
            0x42, 0x01, 0x05, 0x00, 0x00, 0x00, 0x0A, 0x00, 0x00, 0x00, //
            0x2E, 0x0A, 0x00, 0x00, 0x00, //
            0x30, 0x00, 0x00,
        ]
    );
}

#[test]
fn ny_inline_strings_and_native_hashes() {
    assert_eq!(
        common::code(IsaKind::Ny, "STRING \"hi\"\nENTER 1, 2"),
        vec![0x43, 0x03, b'h', b'i', 0x00, 0x2F, 0x01, 0x02, 0x00]
    );
    assert_eq!(
        common::code(IsaKind::Ny, "NATIVE 2, 1, WAIT"),
        common::code(IsaKind::Ny, "NATIVE 2, 1, `wait`")
    );
}

#[test]
fn ny_has_no_string_table() {
    assert_eq!(
        assemble_err(IsaKind::Ny, ".string"),
        Error::Generate(Located::with_loc(
            Loc::new(1, 1),
            generate::Error::SegmentUnavailable {
                segment: SegmentKind::String,
                isa: IsaKind::Ny,
            }
        ))
    );
}

#[test]
fn unknown_natives_warn() {
    use sctools::script::{NativeDb, NativeMap};

    let mut db = NativeMap::new();
    db.insert(0x10, "KNOWN").insert_translation(0x20, 0x10);
    let options = AssemblerOptions {
        native_db: Some(&db as &dyn NativeDb),
        ..AssemblerOptions::default()
    };
    let assembly = assembler::assemble(".include\n.native 0x20, 0x30", &options).unwrap();
    assert_eq!(assembly.script.native_hashes(true), vec![0x10, 0x30]);
    assert_eq!(
        assembly.warnings,
        vec![Located::with_loc(
            Loc::new(2, 15),
            "unknown native hash 0x0000000000000030".to_owned()
        )]
    );
}

#[test]
fn rdr2_calls_are_banked_and_natives_packed() {
    let src = "\
.include
wait: .native 0x1234
.code
main:
ENTER 0, 2
CALL_0 @main
NATIVE 2, 1, wait
STRING \"hi\"
STRING_U32 \"hi\"
PUSH_CONST_U24 70000
LEAVE_1_0
";
    let script = common::assemble(IsaKind::Rdr2, src);
    assert_eq!(
        script.code.flatten(),
        vec![
            0x2D, 0x00, 0x02, 0x00, 0x05, b'm', b'a', b'i', b'n', 0x00, //
            0x52, 0x00, 0x00, //
            0x2C, 0x05, 0x00, //
            0x6F, 0x03, b'h', b'i', 0x00, //
            0x70, 0x03, 0x00, 0x00, 0x00, b'h', b'i', 0x00, //
            0x6D, 0x70, 0x11, 0x01, //
            0x7E,
        ]
    );
    // stored as is
    assert_eq!(script.natives.values(), vec![0x1234]);
    assert_eq!(script.native_hashes(false), vec![0x1234]);
}

#[test]
fn rdr2_calls_reach_later_banks() {
    let src = format!("CALL_1 @far\n{}far:\nLEAVE 0, 0\n", "NOP\n".repeat(0x10000));
    let code = common::code(IsaKind::Rdr2, &src);
    assert_eq!(&code[..3], &[0x53, 0x03, 0x00]);

    assert_eq!(
        assemble_err(IsaKind::Rdr2, "main:\nCALL_1 @main"),
        Error::Resolve(Located::with_loc(
            Loc::new(2, 8),
            resolve::Error::OutOfRange {
                label: "main".to_owned(),
                value: Constant::Int(0),
                field: Field::CallBank(1),
            }
        ))
    );
}

#[test]
fn rdr2_native_limits() {
    assert_eq!(
        assemble_err(IsaKind::Rdr2, "NATIVE 0, 0, 1024"),
        Error::Generate(Located::with_loc(
            Loc::new(1, 14),
            generate::Error::OutOfRange {
                value: Constant::Int(1024),
                field: Field::PackedNativeIndex(0),
            }
        ))
    );
    assert_eq!(
        assemble_err(IsaKind::Rdr2, "NATIVE 0, 2, 0"),
        Error::Generate(Located::with_loc(
            Loc::new(1, 11),
            generate::Error::OutOfRange {
                value: Constant::Int(2),
                field: Field::U8,
            }
        ))
    );
    // the two high index bits sit on top of the counts
    assert_eq!(
        common::code(IsaKind::Rdr2, "NATIVE 31, 1, 1023"),
        vec![0x2C, 0xFF, 0xFF]
    );
}

#[test]
fn rdr2_code_pages_end_with_a_jump() {
    let src = format!("{}PUSH_CONST_U32 1\n", "NOP\n".repeat(PAGE_LENGTH - 4));
    let script = common::assemble(IsaKind::Rdr2, &src);
    let pages = script.code.pages();
    assert_eq!(&pages[0][PAGE_LENGTH - 4..], &[0x62, 0x01, 0x00, 0x00]);
    assert_eq!(pages[1], vec![0x28, 0x01, 0x00, 0x00, 0x00]);
}

#[test]
fn payne_strings_grow_a_long_length() {
    assert_eq!(
        common::code(IsaKind::Payne, "main:\nENTER 1, 2\nSTRING \"hi\""),
        vec![
            0x2F, 0x01, 0x02, 0x00, 0x05, b'm', b'a', b'i', b'n', 0x00, //
            0x43, 0x03, b'h', b'i', 0x00,
        ]
    );

    let long = "a".repeat(300);
    let code = common::code(IsaKind::Payne, &format!("STRING \"{}\"", long));
    assert_eq!(&code[..4], &[0x43, 0x00, 0x2D, 0x01]);
    assert_eq!(code.len(), 4 + 301);
    assert_eq!(&code[4..304], long.as_bytes());

    assert_eq!(
        assemble_err(IsaKind::Payne, &format!("STRING \"{}\"", "a".repeat(0xFFFF))),
        Error::Generate(Located::with_loc(
            Loc::new(1, 8),
            generate::Error::StringTooLong {
                len: 0x10000,
                max: 0xFFFF,
            }
        ))
    );
}
