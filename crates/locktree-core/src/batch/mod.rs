//! Batch files: tree description plus a list of requests
//!
//! Input layout, one item per line:
//!
//! ```text
//! <node count N>
//! <branching factor B>
//! <request count Q>
//! <name 0>
//! ...
//! <name N-1>
//! <op> <node> <user>      (Q lines)
//! ```
//!
//! `<op>` is `1`/`2`/`3` or `Lock`/`Unlock`/`Upgrade`. Expected-output files
//! hold one `true` or `false` per line.

use crate::domain::locking::LockTree;
use crate::error::{Error, Result};
use crate::processor::{
    self, Operation, ProcessingMode, Request, Response, in_ticket_order, process_batch,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// A parsed batch file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchInput {
    /// Node names in index order
    pub node_names: Vec<String>,
    pub branching_factor: usize,
    pub requests: Vec<Request>,
}

impl BatchInput {
    /// Parse batch text
    ///
    /// Trailing blank lines are ignored; anything else that does not fit the
    /// layout is an [`Error::Parse`] carrying its 1-based line number.
    pub fn parse(text: &str) -> Result<Self> {
        let mut reader = LineReader::new(text);

        let node_count = reader.next_count("the node count")?;
        let branching_factor = reader.next_count("the branching factor")?;
        let request_count = reader.next_count("the request count")?;

        let mut node_names = Vec::with_capacity(node_count);
        for _ in 0..node_count {
            let (line, name) = reader.next_line("a node name")?;
            if name.is_empty() {
                return Err(Error::parse(line, "expected a node name, found a blank line"));
            }
            node_names.push(name.to_string());
        }

        let mut requests = Vec::with_capacity(request_count);
        for seq in 0..request_count {
            let (line, text) = reader.next_line("a request")?;
            requests.push(parse_request(line, seq, text)?);
        }

        reader.expect_end()?;

        debug!(
            nodes = node_names.len(),
            branching_factor,
            requests = requests.len(),
            "Batch parsed"
        );

        Ok(Self {
            node_names,
            branching_factor,
            requests,
        })
    }

    /// Read and parse a batch file
    pub fn from_path(path: &Path) -> Result<Self> {
        Self::parse(&fs::read_to_string(path)?)
    }

    /// Build an empty tree over this batch's nodes
    pub fn build_tree(&self) -> Result<LockTree> {
        Ok(LockTree::new(
            self.node_names.iter().cloned(),
            self.branching_factor,
        )?)
    }

    /// Run every request against `tree`
    pub async fn run_on(&self, tree: Arc<LockTree>, mode: ProcessingMode) -> Vec<Response> {
        process_batch(tree, self.requests.clone(), mode).await
    }

    /// Run every request against a fresh tree
    pub async fn run(&self, mode: ProcessingMode) -> Result<Vec<Response>> {
        let tree = Arc::new(self.build_tree()?);
        Ok(self.run_on(tree, mode).await)
    }

    /// Check concurrent responses against a sequential replay
    ///
    /// Replays the requests on a fresh tree in the order their operations
    /// took effect and requires every result to match.
    pub async fn verify_replay(&self, responses: &[Response]) -> Result<()> {
        if responses.len() != self.requests.len() {
            return Err(Error::ResultCountMismatch {
                expected: self.requests.len(),
                actual: responses.len(),
            });
        }

        let tree = self.build_tree()?;
        for response in in_ticket_order(responses) {
            let replayed = processor::dispatch(&tree, &response.request).await;
            if replayed.result != response.result {
                return Err(Error::ResultMismatch {
                    index: response.request.seq + 1,
                    expected: replayed.result,
                    actual: response.result,
                });
            }
        }
        Ok(())
    }
}

/// Parse expected-output text, one `true` or `false` per line
pub fn parse_expected(text: &str) -> Result<Vec<bool>> {
    text.lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty())
        .map(|(line, value)| match value {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(Error::parse(
                line,
                format!("expected 'true' or 'false', found '{}'", other),
            )),
        })
        .collect()
}

/// Read and parse an expected-output file
pub fn read_expected(path: &Path) -> Result<Vec<bool>> {
    parse_expected(&fs::read_to_string(path)?)
}

/// Require `actual` to equal `expected`, reporting the first difference
///
/// Mismatch indices are 1-based request numbers.
pub fn compare_results(actual: &[bool], expected: &[bool]) -> Result<()> {
    if actual.len() != expected.len() {
        return Err(Error::ResultCountMismatch {
            expected: expected.len(),
            actual: actual.len(),
        });
    }

    match actual.iter().zip(expected).position(|(a, e)| a != e) {
        Some(i) => Err(Error::ResultMismatch {
            index: i + 1,
            expected: expected[i],
            actual: actual[i],
        }),
        None => Ok(()),
    }
}

fn parse_request(line: usize, seq: usize, text: &str) -> Result<Request> {
    let fields: Vec<&str> = text.split_whitespace().collect();
    let [op, node, user] = fields.as_slice() else {
        return Err(Error::parse(
            line,
            format!(
                "expected `<op> <node> <user>`, found {} field(s)",
                fields.len()
            ),
        ));
    };

    let user_id = user.parse().map_err(|_| {
        Error::parse(line, format!("user id must be an integer, found '{}'", user))
    })?;

    Ok(Request::new(seq, Operation::parse(op), *node, user_id))
}

/// Line cursor that remembers where it is for error messages
struct LineReader<'a> {
    lines: std::iter::Enumerate<std::str::Lines<'a>>,
    consumed: usize,
}

impl<'a> LineReader<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines().enumerate(),
            consumed: 0,
        }
    }

    fn next_line(&mut self, what: &str) -> Result<(usize, &'a str)> {
        match self.lines.next() {
            Some((i, line)) => {
                self.consumed = i + 1;
                Ok((i + 1, line.trim()))
            }
            None => Err(Error::parse(
                self.consumed + 1,
                format!("unexpected end of input, expected {}", what),
            )),
        }
    }

    fn next_count(&mut self, what: &str) -> Result<usize> {
        let (line, text) = self.next_line(what)?;
        text.parse().map_err(|_| {
            Error::parse(
                line,
                format!("expected {} as a non-negative integer, found '{}'", what, text),
            )
        })
    }

    fn expect_end(&mut self) -> Result<()> {
        match self.lines.find(|(_, line)| !line.trim().is_empty()) {
            Some((i, _)) => Err(Error::parse(i + 1, "unexpected content after the last request")),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::locking::OperationKind;
    use tempfile::TempDir;

    const SAMPLE: &str = "\
7
2
5
World
Asia
Africa
China
India
SouthAfrica
Egypt
1 China 9
1 India 9
3 Asia 9
Unlock Asia 9
2 Asia 9
";

    #[test]
    fn test_parse_sample() {
        let input = BatchInput::parse(SAMPLE).unwrap();

        assert_eq!(input.node_names.len(), 7);
        assert_eq!(input.node_names[3], "China");
        assert_eq!(input.branching_factor, 2);
        assert_eq!(input.requests.len(), 5);

        let first = &input.requests[0];
        assert_eq!(first.seq, 0);
        assert_eq!(first.operation, Operation::Lock);
        assert_eq!(first.node_name, "China");
        assert_eq!(first.user_id, 9);
        assert_eq!(input.requests[3].operation, Operation::Unlock);
        assert_eq!(input.requests[4].seq, 4);
    }

    #[test]
    fn test_trailing_blank_lines_ignored() {
        let text = format!("{}\n\n   \n", SAMPLE);
        assert!(BatchInput::parse(&text).is_ok());
    }

    #[test]
    fn test_unknown_operation_is_not_a_parse_error() {
        let input = BatchInput::parse("1\n2\n1\nroot\n7 root 1\n").unwrap();
        assert_eq!(
            input.requests[0].operation,
            Operation::Unknown("7".to_string())
        );
    }

    fn parse_error_line(text: &str) -> usize {
        match BatchInput::parse(text) {
            Err(Error::Parse { line, .. }) => line,
            other => panic!("expected a parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_errors_carry_line_numbers() {
        assert_eq!(parse_error_line(""), 1);
        assert_eq!(parse_error_line("two\n2\n0\n"), 1);
        assert_eq!(parse_error_line("1\n-2\n0\nroot\n"), 2);
        assert_eq!(parse_error_line("2\n2\n0\nroot\n"), 5);
        assert_eq!(parse_error_line("2\n2\n0\nroot\n\n"), 5);
        assert_eq!(parse_error_line("1\n2\n1\nroot\n1 root\n"), 5);
        assert_eq!(parse_error_line("1\n2\n1\nroot\n1 root 2 extra\n"), 5);
        assert_eq!(parse_error_line("1\n2\n1\nroot\n1 root bob\n"), 5);
        assert_eq!(parse_error_line("1\n2\n1\nroot\n1 root 2\n1 root 3\n"), 6);
    }

    #[test]
    fn test_build_tree_reports_duplicates() {
        let input = BatchInput::parse("2\n2\n0\nsame\nsame\n").unwrap();
        let err = input.build_tree().unwrap_err();
        assert_eq!(err.code(), "E301");
    }

    #[tokio::test]
    async fn test_run_sample() {
        let input = BatchInput::parse(SAMPLE).unwrap();
        let responses = input.run(ProcessingMode::Sequential).await.unwrap();

        let results: Vec<bool> = responses.iter().map(|r| r.result).collect();
        assert_eq!(results, vec![true, true, true, true, false]);
    }

    #[test]
    fn test_parse_expected() {
        assert_eq!(
            parse_expected("true\nfalse\n\ntrue\n").unwrap(),
            vec![true, false, true]
        );
        match parse_expected("true\nmaybe\n") {
            Err(Error::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected a parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_compare_results() {
        assert!(compare_results(&[true, false], &[true, false]).is_ok());

        let err = compare_results(&[true, true], &[true, false]).unwrap_err();
        assert!(matches!(
            err,
            Error::ResultMismatch {
                index: 2,
                expected: false,
                actual: true
            }
        ));

        let err = compare_results(&[true], &[true, false]).unwrap_err();
        assert!(matches!(
            err,
            Error::ResultCountMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn test_files_on_disk() {
        let dir = TempDir::new().unwrap();
        let input_path = dir.path().join("input.txt");
        let output_path = dir.path().join("output.txt");
        fs::write(&input_path, SAMPLE).unwrap();
        fs::write(&output_path, "true\ntrue\ntrue\ntrue\nfalse\n").unwrap();

        let input = BatchInput::from_path(&input_path).unwrap();
        assert_eq!(input.requests.len(), 5);
        assert_eq!(read_expected(&output_path).unwrap().len(), 5);

        let missing = BatchInput::from_path(&dir.path().join("missing.txt")).unwrap_err();
        assert!(matches!(missing, Error::Io(_)));
    }

    #[tokio::test]
    async fn test_verify_replay_detects_tampering() {
        let input = BatchInput::parse(SAMPLE).unwrap();
        let mut responses = input.run(ProcessingMode::Sequential).await.unwrap();
        assert!(input.verify_replay(&responses).await.is_ok());

        responses[4].result = true;
        let err = input.verify_replay(&responses).await.unwrap_err();
        assert!(matches!(err, Error::ResultMismatch { index: 5, .. }));

        responses.pop();
        let err = input.verify_replay(&responses).await.unwrap_err();
        assert_eq!(err.code(), "E201");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_run_replays() {
        let input = BatchInput::parse(SAMPLE).unwrap();
        let responses = input.run(ProcessingMode::Concurrent).await.unwrap();
        assert_eq!(responses.len(), 5);
        input.verify_replay(&responses).await.unwrap();
    }

    #[test]
    fn test_request_operation_names() {
        let input = BatchInput::parse("1\n2\n3\nroot\nlock root 1\nUPGRADE root 1\n2 root 1\n").unwrap();
        let kinds: Vec<_> = input
            .requests
            .iter()
            .map(|r| r.operation.kind())
            .collect();
        assert_eq!(
            kinds,
            vec![
                Some(OperationKind::Lock),
                Some(OperationKind::Upgrade),
                Some(OperationKind::Unlock)
            ]
        );
    }
}
