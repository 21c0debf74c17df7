use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use super::draft::{Answers, Draft, DraftKey, DraftStore, DraftStoreError};
use super::schema::{FormField, FormSchema, FormSection};

/// Cursor and merged answers for one applicant walking one trip's intake form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    key: DraftKey,
    cursor: usize,
    draft: Draft,
    complete: bool,
}

impl SessionState {
    pub fn key(&self) -> &DraftKey {
        &self.key
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn draft(&self) -> &Draft {
        &self.draft
    }

    /// True once the last section has been submitted and not retreated from.
    pub fn is_complete(&self) -> bool {
        self.complete
    }
}

/// Position report for the progress header and submit button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub step: usize,
    pub total: usize,
    pub label: String,
    pub section_title: String,
    pub is_last: bool,
    pub submit_label: &'static str,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("unable to persist draft: {0}")]
    Persist(#[source] DraftStoreError),
    #[error("unable to load draft: {0}")]
    Load(#[source] DraftStoreError),
}

/// Walks applicants through the schema, merging each submitted section into the draft store.
///
/// The manager performs no validation beyond restricting merged keys to the current
/// section; required-field checks belong to [`super::validation`].
#[derive(Clone)]
pub struct FormSessionManager {
    schema: Arc<FormSchema>,
    drafts: Arc<dyn DraftStore>,
}

impl FormSessionManager {
    pub fn new(schema: Arc<FormSchema>, drafts: Arc<dyn DraftStore>) -> Self {
        Self { schema, drafts }
    }

    pub fn schema(&self) -> &FormSchema {
        &self.schema
    }

    /// Enter the flow at the first section, rehydrating any stored draft.
    pub async fn open(&self, key: DraftKey) -> Result<SessionState, SessionError> {
        let draft = match self.drafts.get(&key).await {
            Ok(Some(draft)) => {
                debug!(draft_key = %key, fields = draft.len(), "rehydrated stored draft");
                draft
            }
            Ok(None) => Draft::new(),
            Err(DraftStoreError::Corrupt { reason, .. }) => {
                warn!(draft_key = %key, %reason, "discarding unreadable draft");
                self.drafts.clear(&key).await.map_err(SessionError::Load)?;
                Draft::new()
            }
            Err(err) => return Err(SessionError::Load(err)),
        };

        Ok(SessionState {
            key,
            cursor: 0,
            draft,
            complete: false,
        })
    }

    pub fn current_section<'a>(&'a self, state: &SessionState) -> &'a FormSection {
        let last = self.schema.len().saturating_sub(1);
        &self.schema.sections()[state.cursor.min(last)]
    }

    /// Merge the current section's answers, persist the draft, and move forward.
    ///
    /// Returns once the draft store acknowledged the write. On the last section the
    /// cursor stays put and the returned state reports completion.
    pub async fn advance(
        &self,
        state: &SessionState,
        answers: &Answers,
    ) -> Result<SessionState, SessionError> {
        let section = self.current_section(state);
        let draft = merge_section(section, &state.draft, answers);

        self.drafts
            .set(&state.key, &draft)
            .await
            .map_err(SessionError::Persist)?;

        let is_last = state.cursor + 1 >= self.schema.len();
        let next = SessionState {
            key: state.key.clone(),
            cursor: if is_last { state.cursor } else { state.cursor + 1 },
            draft,
            complete: is_last,
        };

        debug!(
            draft_key = %next.key,
            section = %section.id,
            complete = next.complete,
            "advanced intake section"
        );
        Ok(next)
    }

    /// Step back one section, keeping every merged answer. No-op on the first section.
    pub fn retreat(&self, state: &SessionState) -> SessionState {
        SessionState {
            key: state.key.clone(),
            cursor: state.cursor.saturating_sub(1),
            draft: state.draft.clone(),
            complete: false,
        }
    }

    /// Current section's fields with defaults taken from the draft, else the static default.
    pub fn fields_with_defaults(&self, state: &SessionState) -> Vec<FormField> {
        self.current_section(state)
            .fields
            .iter()
            .map(|field| {
                let mut field = field.clone();
                if let Some(value) = state.draft.get(&field.name) {
                    field.default_value = Some(value.to_string());
                }
                field
            })
            .collect()
    }

    pub fn progress(&self, state: &SessionState) -> Progress {
        let total = self.schema.len();
        let step = state.cursor.min(total.saturating_sub(1)) + 1;
        let is_last = step == total;

        Progress {
            step,
            total,
            label: format!("Step {step} of {total}"),
            section_title: self.current_section(state).title.clone(),
            is_last,
            submit_label: if is_last {
                "Proceed to payment"
            } else {
                "Continue"
            },
        }
    }
}

/// Last write wins per key; keys outside `section` are dropped.
fn merge_section(section: &FormSection, draft: &Draft, answers: &Answers) -> Draft {
    let mut merged = draft.clone();
    for (field, value) in answers {
        if section.has_field(field) {
            merged.insert(field.clone(), value.clone());
        }
    }
    merged
}
