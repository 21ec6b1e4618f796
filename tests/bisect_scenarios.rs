//! Concrete end-to-end scenarios for the bisect (delete-chunk) strategy.

mod common;

use common::{cleanup, minimize, test_config, unique_temp_dir, write_oracle};

#[test]
fn finds_single_required_byte() {
    // Scenario 1: "ABCDEFGH", oracle succeeds iff input contains 'D'.
    let dir = unique_temp_dir("bisect_scenario1");
    std::fs::create_dir_all(&dir).unwrap();
    let oracle = write_oracle(
        &dir,
        r#"
data=$(cat)
case "$data" in
  *D*) exit 0 ;;
  *) exit 1 ;;
esac
"#,
    );

    let config = test_config(oracle);
    let result = minimize(config, b"ABCDEFGH");
    assert_eq!(result, b"D");

    cleanup(&dir);
}

#[test]
fn shrinks_to_size_floor() {
    // Scenario 2: 1024 bytes of 0xFF, oracle succeeds iff size <= 2.
    let dir = unique_temp_dir("bisect_scenario2");
    std::fs::create_dir_all(&dir).unwrap();
    let oracle = write_oracle(
        &dir,
        r#"
n=$(wc -c)
if [ "$n" -le 2 ]; then exit 0; else exit 1; fi
"#,
    );

    let config = test_config(oracle);
    let input = vec![0xFFu8; 1024];
    let result = minimize(config, &input);
    assert!(result.len() <= 2, "expected <= 2 bytes, got {}", result.len());

    cleanup(&dir);
}

#[test]
fn finds_required_substring() {
    // Scenario 3: "hello world", oracle succeeds iff input contains "lo w".
    let dir = unique_temp_dir("bisect_scenario3");
    std::fs::create_dir_all(&dir).unwrap();
    let oracle = write_oracle(
        &dir,
        r#"
data=$(cat)
case "$data" in
  *"lo w"*) exit 0 ;;
  *) exit 1 ;;
esac
"#,
    );

    let config = test_config(oracle);
    let result = minimize(config, b"hello world");
    assert_eq!(result, b"lo w");

    cleanup(&dir);
}

#[test]
fn always_succeeding_oracle_converges_to_empty() {
    // Boundary: an oracle that always succeeds must converge to a zero-byte
    // result under the delete strategy (spec section 8's boundary case).
    let dir = unique_temp_dir("bisect_always_succeeds");
    std::fs::create_dir_all(&dir).unwrap();
    let oracle = write_oracle(&dir, "cat >/dev/null\nexit 0\n");

    let config = test_config(oracle);
    let result = minimize(config, b"whatever bytes go here, doesn't matter");
    assert!(result.is_empty(), "expected empty result, got {result:?}");

    cleanup(&dir);
}

#[test]
fn only_original_succeeds_leaves_input_untouched() {
    // Boundary: an oracle that only accepts the exact original input must
    // leave the tree with a single Success node (the root) and return the
    // input unchanged.
    let dir = unique_temp_dir("bisect_only_original");
    std::fs::create_dir_all(&dir).unwrap();
    let oracle = write_oracle(
        &dir,
        r#"
data=$(cat)
if [ "$data" = "keep me whole" ]; then exit 0; else exit 1; fi
"#,
    );

    let config = test_config(oracle);
    let result = minimize(config, b"keep me whole");
    assert_eq!(result, b"keep me whole");

    cleanup(&dir);
}

#[test]
fn empty_input_oracle_rejects_everything() {
    // Boundary: empty input, oracle that never succeeds must not crash and
    // must return an empty result (there's nothing smaller to try).
    let dir = unique_temp_dir("bisect_empty_input");
    std::fs::create_dir_all(&dir).unwrap();
    let oracle = write_oracle(&dir, "cat >/dev/null\nexit 1\n");

    let mut config = test_config(oracle);
    config.skip_initial_verify = true;
    let result = minimize(config, b"");
    assert!(result.is_empty());

    cleanup(&dir);
}

#[test]
fn one_minimal_no_further_single_byte_deletion_succeeds() {
    // Round-trip property: the minimized output is 1-minimal — no further
    // single-byte deletion of the result still satisfies the oracle.
    let dir = unique_temp_dir("bisect_one_minimal");
    std::fs::create_dir_all(&dir).unwrap();
    let oracle = write_oracle(
        &dir,
        r#"
data=$(cat)
case "$data" in
  *D*) exit 0 ;;
  *) exit 1 ;;
esac
"#,
    );

    let config = test_config(oracle);
    let result = minimize(config, b"ABCDEFGH");
    assert_eq!(result, b"D");

    // Deleting the one remaining byte can't possibly still contain 'D'.
    assert!(result.len() == 1);
}
