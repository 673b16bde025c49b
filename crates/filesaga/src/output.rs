use std::fmt::Write as _;

use filesaga_core::{BatchOutcome, RollbackResult, StepReport, Transaction};
use filesaga_saga::RecoveryReport;

pub(crate) trait OutputFormatter {
    fn format_outcome(&self, outcome: &BatchOutcome) -> String;
    fn format_recovery(&self, report: &RecoveryReport) -> String;
    fn format_entries(&self, entries: &[Transaction], all: bool) -> String;
}

pub(crate) struct PlainTextFormatter;

impl PlainTextFormatter {
    fn format_results(output: &mut String, results: &[StepReport]) {
        for report in results {
            let mark = if report.success { "✓" } else { "✗" };
            let _ = write!(output, "  {mark} {} {}", report.kind, report.source.display());
            if let Some(destination) = &report.destination {
                let _ = write!(output, " -> {}", destination.display());
            }
            if let Some(error) = &report.error {
                let _ = write!(output, ": {}", error.message);
            }
            output.push('\n');
        }
    }

    fn format_rollback(output: &mut String, results: &[RollbackResult]) {
        for result in results {
            let mark = if result.success { "↩" } else { "⚠" };
            let _ = write!(output, "  {mark} {}", result.action);
            if let Some(error) = &result.error {
                let _ = write!(output, ": {error}");
            }
            output.push('\n');
        }
    }
}

impl OutputFormatter for PlainTextFormatter {
    fn format_outcome(&self, outcome: &BatchOutcome) -> String {
        let mut output = String::new();

        match outcome {
            BatchOutcome::Committed(batch) => {
                let _ = writeln!(
                    output,
                    "Committed transaction {} ({} operation(s))",
                    batch.transaction_id, batch.success_count
                );
                Self::format_results(&mut output, &batch.results);
            }
            BatchOutcome::Failed(batch) => {
                let _ = writeln!(
                    output,
                    "Transaction {} failed ({})",
                    batch.transaction_id, batch.final_status
                );
                Self::format_results(&mut output, &batch.results);
                if !batch.reconciled.is_empty() || !batch.rollback_results.is_empty() {
                    output.push_str("Rollback:\n");
                    Self::format_rollback(&mut output, &batch.reconciled);
                    Self::format_rollback(&mut output, &batch.rollback_results);
                }
                if !batch.rolled_back {
                    output.push_str("Rollback deferred; run `filesaga recover` to finish it.\n");
                }
                let _ = writeln!(output, "{}", batch.summary());
            }
            BatchOutcome::Rejected(batch) => {
                let _ = writeln!(output, "Batch rejected: {}", batch.error.message);
            }
        }

        output
    }

    fn format_recovery(&self, report: &RecoveryReport) -> String {
        let mut output = String::new();

        if report.is_clean() {
            output.push_str("Nothing to recover.\n");
        }

        for recovered in &report.recovered {
            let _ = writeln!(
                output,
                "Recovered {}: {} -> {} ({} compensation(s))",
                recovered.transaction_id,
                recovered.found_status,
                recovered.final_status,
                recovered.rollback_results.len()
            );
            for step in &recovered.unreverted {
                let _ = write!(output, "  verify manually: {}", step.original_path.display());
                if let Some(current) = &step.current_path {
                    let _ = write!(output, " (now at {})", current.display());
                }
                output.push('\n');
            }
            for path in &recovered.permanent_effects {
                let _ = writeln!(output, "  verify manually: {} (deleted)", path.display());
            }
        }

        for failure in &report.failures {
            let _ = writeln!(
                output,
                "Could not recover {}: {}",
                failure.transaction_id, failure.error
            );
        }

        if report.pruned > 0 {
            let _ = writeln!(output, "Pruned {} expired entry(ies).", report.pruned);
        }

        output
    }

    fn format_entries(&self, entries: &[Transaction], all: bool) -> String {
        if entries.is_empty() {
            return if all {
                "No journal entries.\n".to_owned()
            } else {
                "No incomplete transactions.\n".to_owned()
            };
        }

        let mut output = String::new();
        for txn in entries {
            let _ = writeln!(
                output,
                "{}  {:<21} {} step(s)  {}",
                txn.id,
                txn.status.to_string(),
                txn.steps.len(),
                txn.created_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use filesaga_core::{
        BatchError, CommittedBatch, ErrorKind, FailedBatch, FileOperation, OperationKind,
        RejectedBatch, RollbackResult, TransactionId, TransactionStatus, UnrevertedStep,
    };
    use filesaga_saga::RecoveredTransaction;

    use super::*;

    fn report(index: usize, success: bool) -> StepReport {
        StepReport {
            index,
            kind: OperationKind::Move,
            source: PathBuf::from(format!("/in/{index}")),
            destination: Some(PathBuf::from(format!("/out/{index}"))),
            success,
            error: None,
        }
    }

    #[test]
    fn committed_outcome_lists_every_step() {
        let id = TransactionId::new();
        let outcome =
            BatchOutcome::Committed(CommittedBatch::new(id, vec![report(0, true), report(1, true)]));

        let text = PlainTextFormatter.format_outcome(&outcome);

        assert!(text.starts_with(&format!("Committed transaction {id} (2 operation(s))")));
        assert!(text.contains("✓ move /in/1 -> /out/1"));
    }

    #[test]
    fn failed_outcome_shows_rollback_and_summary() {
        let outcome = BatchOutcome::Failed(FailedBatch {
            success: false,
            error: BatchError::new(ErrorKind::PartialRollback, "operation 2 of 2 failed"),
            transaction_id: TransactionId::new(),
            rolled_back: true,
            rollback_results: vec![RollbackResult {
                success: false,
                step: 0,
                action: "move /out/0 -> /in/0".to_owned(),
                error: Some("destination exists".to_owned()),
            }],
            reconciled: Vec::new(),
            failed_step: Some(1),
            results: vec![report(0, true), report(1, false)],
            final_status: TransactionStatus::PartiallyRolledBack,
            unreverted: vec![UnrevertedStep {
                step: 0,
                kind: OperationKind::Move,
                original_path: PathBuf::from("/in/0"),
                current_path: Some(PathBuf::from("/out/0")),
                reason: "destination exists".to_owned(),
            }],
            permanent_effects: Vec::new(),
        });

        let text = PlainTextFormatter.format_outcome(&outcome);

        assert!(text.contains("failed (partially rolled back)"));
        assert!(text.contains("⚠ move /out/0 -> /in/0: destination exists"));
        assert!(text.contains("rolled back 0 of 1 operations"));
        assert!(text.contains("/in/0 (now at /out/0)"));
        assert!(!text.contains("filesaga recover"));
    }

    #[test]
    fn rejected_outcome_is_one_line() {
        let outcome = BatchOutcome::Rejected(RejectedBatch::new(BatchError::new(
            ErrorKind::Validation,
            "batch is empty",
        )));

        assert_eq!(
            PlainTextFormatter.format_outcome(&outcome),
            "Batch rejected: batch is empty\n"
        );
    }

    #[test]
    fn clean_recovery_says_so() {
        let text = PlainTextFormatter.format_recovery(&RecoveryReport::default());

        assert_eq!(text, "Nothing to recover.\n");
    }

    #[test]
    fn recovery_lists_files_to_verify() {
        let report = RecoveryReport {
            recovered: vec![RecoveredTransaction {
                transaction_id: TransactionId::new(),
                found_status: TransactionStatus::Executing,
                final_status: TransactionStatus::PartiallyRolledBack,
                rollback_results: Vec::new(),
                reconciled: Vec::new(),
                unreverted: Vec::new(),
                permanent_effects: vec![PathBuf::from("/gone.txt")],
            }],
            failures: Vec::new(),
            pruned: 3,
        };

        let text = PlainTextFormatter.format_recovery(&report);

        assert!(text.contains("executing -> partially rolled back"));
        assert!(text.contains("verify manually: /gone.txt (deleted)"));
        assert!(text.contains("Pruned 3 expired entry(ies)."));
        assert!(!text.contains("Nothing to recover"));
    }

    #[test]
    fn entries_show_id_status_and_size() {
        let txn = Transaction::new(vec![FileOperation::Delete {
            source: PathBuf::from("/a"),
        }]);

        let text = PlainTextFormatter.format_entries(std::slice::from_ref(&txn), true);

        assert!(text.starts_with(&txn.id.to_string()));
        assert!(text.contains("pending"));
        assert!(text.contains("1 step(s)"));
    }

    #[test]
    fn empty_listing_depends_on_scope() {
        assert_eq!(
            PlainTextFormatter.format_entries(&[], false),
            "No incomplete transactions.\n"
        );
        assert_eq!(
            PlainTextFormatter.format_entries(&[], true),
            "No journal entries.\n"
        );
    }
}
