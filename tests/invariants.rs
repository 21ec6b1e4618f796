//! Quantified invariants and round-trip properties from spec section 8 that
//! don't belong to one specific scenario.

mod common;

use common::{cleanup, minimize, test_config, unique_temp_dir, write_oracle};

#[test]
fn stable_rerun_converges_without_growing() {
    // "Running the tool twice with --stable converges in finitely many
    // iterations: the second iteration returns a file of identical size to
    // the first." We drive two passes by hand (rather than through
    // `--stable` itself) since the engine API doesn't loop on its own.
    let dir = unique_temp_dir("stable_convergence");
    std::fs::create_dir_all(&dir).unwrap();
    let oracle = write_oracle(
        &dir,
        r#"
data=$(cat)
case "$data" in
  *needle*) exit 0 ;;
  *) exit 1 ;;
esac
"#,
    );

    let config = test_config(oracle);
    let input = b"hay hay hay needle hay hay hay".to_vec();

    let first = minimize(config.clone(), &input);
    let second = minimize(config, &first);
    assert_eq!(second.len(), first.len(), "second pass must not grow the result");
    assert_eq!(second, b"needle");
}

#[test]
fn delete_candidate_length_matches_chunk_removed() {
    // "produced file length = source.size - chunksize" for the delete
    // strategy: exercised indirectly by checking the final result is
    // strictly shorter than the input whenever any reduction is possible.
    let dir = unique_temp_dir("delete_length");
    std::fs::create_dir_all(&dir).unwrap();
    let oracle = write_oracle(
        &dir,
        r#"
data=$(cat)
case "$data" in
  *keep*) exit 0 ;;
  *) exit 1 ;;
esac
"#,
    );

    let config = test_config(oracle);
    let input = b"padding padding keep padding padding".to_vec();
    let result = minimize(config, &input);
    assert!(result.len() < input.len());
    assert_eq!(result, b"keep");
}
