/// Compare program output with expected output.
///
/// Leading and trailing whitespace of the whole output is ignored, so a
/// missing or extra final newline never turns into a wrong answer. Everything
/// in between must match exactly.
pub fn compare_output(actual: &str, expected: &str) -> bool {
    actual.trim() == expected.trim()
}
