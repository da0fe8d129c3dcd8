/// Target-environment specifics: symbol naming and section directives
/// differ between the supported platforms, the instruction stream does not.
pub trait Env {
    const ENTRY_POINT: &str;

    const GLOBAL_PROLOGUE: &str;

    const SECTION_TEXT: &str;
    const SECTION_READ_ONLY_DATA: &str;

    /// The C allocator symbol backing the `alloc` stack instruction.
    const MALLOC: &str;
    /// The C printf symbol backing the `print` debug instruction.
    const PRINTF: &str;
}

impl Env for Linux {
    const ENTRY_POINT: &str = "main";

    const GLOBAL_PROLOGUE: &str = concat!(
        ".intel_syntax noprefix\n",
        ".section .note.GNU-stack,\"\",@progbits\n",
    );

    const SECTION_TEXT: &str = ".text";
    const SECTION_READ_ONLY_DATA: &str = ".rodata";

    const MALLOC: &str = "malloc";
    const PRINTF: &str = "printf";
}

impl Env for Darwin {
    const ENTRY_POINT: &str = "_main";

    const GLOBAL_PROLOGUE: &str = ".intel_syntax noprefix\n";

    const SECTION_TEXT: &str = "__TEXT,__text,regular,pure_instructions";
    const SECTION_READ_ONLY_DATA: &str = "__TEXT,__const";

    const MALLOC: &str = "_malloc";
    const PRINTF: &str = "_printf";
}

pub struct Linux;

pub struct Darwin;
