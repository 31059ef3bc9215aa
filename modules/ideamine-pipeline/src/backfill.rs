//! Backfill driver — replays the classifier over pre-existing unlabeled
//! submissions.
//!
//! Submissions are pulled in ascending insertion-sequence order so primary
//! ownership is established deterministically. Records already carrying a
//! concept reference never come back from the store query, which also makes
//! the driver resumable: re-running continues from wherever the last run
//! stopped. One record's failure is counted, not propagated.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tracing::{info, warn};

use ideamine_common::types::{RunSummary, Submission};

use crate::classifier::{ClassifiedSubmission, DuplicateClassifier};
use crate::traits::ConceptStore;

/// Log progress every this many processed submissions.
const PROGRESS_INTERVAL: u64 = 100;

/// Per-record outcome: success with the classification, or failure with the
/// reason. Failures feed the end-of-run error count.
#[derive(Debug, Clone)]
pub enum RecordOutcome {
    Classified(ClassifiedSubmission),
    Failed { reason: String },
}

pub struct BackfillDriver {
    store: Arc<dyn ConceptStore>,
    classifier: Arc<DuplicateClassifier>,
    batch_size: usize,
}

impl BackfillDriver {
    pub fn new(
        store: Arc<dyn ConceptStore>,
        classifier: Arc<DuplicateClassifier>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            classifier,
            batch_size,
        }
    }

    /// Run the backfill to completion. Returns the aggregate summary.
    pub async fn run(&self) -> Result<RunSummary> {
        self.run_from(i64::MIN).await
    }

    /// Resume from a known point: only submissions with
    /// `insertion_sequence > after_sequence` are processed.
    pub async fn run_from(&self, after_sequence: i64) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut cursor = after_sequence;
        let started = Instant::now();

        loop {
            let batch = self
                .store
                .unlinked_submissions(cursor, self.batch_size)
                .await?;
            if batch.is_empty() {
                break;
            }
            // Advance the cursor unconditionally so records that classify
            // as unknown don't spin the loop; they stay unlinked and are
            // picked up by the next run.
            cursor = batch
                .iter()
                .map(|s| s.insertion_sequence)
                .max()
                .unwrap_or(cursor);

            for submission in &batch {
                match self.process(submission).await {
                    RecordOutcome::Classified(classified) => {
                        summary.absorb_classification(
                            &classified.classification,
                            classified.degraded,
                        );
                    }
                    RecordOutcome::Failed { reason } => {
                        warn!(
                            submission_id = %submission.id,
                            sequence = submission.insertion_sequence,
                            reason = reason.as_str(),
                            "Submission failed, continuing backfill"
                        );
                        summary.total += 1;
                        summary.errors += 1;
                    }
                }
                if summary.total % PROGRESS_INTERVAL == 0 {
                    self.log_progress(&summary, started.elapsed().as_secs_f64());
                }
            }
        }

        self.log_progress(&summary, started.elapsed().as_secs_f64());
        info!(
            total = summary.total,
            unique = summary.unique_concepts_created,
            duplicates = summary.duplicates_linked,
            unknown = summary.unknown,
            degraded = summary.degraded,
            errors = summary.errors,
            "Backfill complete"
        );
        Ok(summary)
    }

    async fn process(&self, submission: &Submission) -> RecordOutcome {
        match self.classifier.classify(submission).await {
            Ok(classified) => RecordOutcome::Classified(classified),
            Err(e) => RecordOutcome::Failed {
                reason: e.to_string(),
            },
        }
    }

    fn log_progress(&self, summary: &RunSummary, elapsed_secs: f64) {
        let throughput = if elapsed_secs > 0.0 {
            summary.total as f64 / elapsed_secs
        } else {
            0.0
        };
        info!(
            processed = summary.total,
            unique = summary.unique_concepts_created,
            duplicates = summary.duplicates_linked,
            errors = summary.errors,
            throughput_per_sec = format!("{throughput:.1}").as_str(),
            "Backfill progress"
        );
    }
}
