//! Multi-step proposal draft

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::StandardError;
use crate::services::proposals::{CreateProposal, Priority, ProposalItemInput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WizardStep {
    #[default]
    Customer,
    Details,
    Products,
    Pricing,
    Review,
}

impl WizardStep {
    pub const ALL: [WizardStep; 5] = [
        WizardStep::Customer,
        WizardStep::Details,
        WizardStep::Products,
        WizardStep::Pricing,
        WizardStep::Review,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn next(&self) -> Option<WizardStep> {
        Self::ALL.get(self.index() + 1).copied()
    }

    pub fn prev(&self) -> Option<WizardStep> {
        self.index().checked_sub(1).map(|i| Self::ALL[i])
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WizardStep::Customer => "customer",
            WizardStep::Details => "details",
            WizardStep::Products => "products",
            WizardStep::Pricing => "pricing",
            WizardStep::Review => "review",
        }
    }
}

impl fmt::Display for WizardStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WizardError {
    #[error("Step '{step}' has {} validation error(s)", errors.len())]
    Invalid { step: WizardStep, errors: Vec<String> },

    #[error("Already at the last step")]
    AtLastStep,

    #[error("Cannot skip ahead to '{target}' while '{blocking}' is incomplete")]
    Blocked {
        target: WizardStep,
        blocking: WizardStep,
    },
}

impl From<WizardError> for StandardError {
    fn from(err: WizardError) -> Self {
        let base = StandardError::validation(err.to_string()).component("ProposalWizard");
        match err {
            WizardError::Invalid { step, errors } => base
                .with("step", step)
                .with("errors", errors.join("; ")),
            WizardError::Blocked { blocking, .. } => base.with("step", blocking),
            WizardError::AtLastStep => base,
        }
    }
}

/// Everything collected so far. All fields are optional until validated.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WizardDraft {
    pub customer_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub due_date: Option<DateTime<Utc>>,
    pub currency: Option<String>,
    pub items: Vec<ProposalItemInput>,
}

fn customer_errors(draft: &WizardDraft) -> Vec<String> {
    match draft.customer_id {
        Some(id) if !id.is_nil() => Vec::new(),
        _ => vec!["Select a customer".to_string()],
    }
}

fn details_errors(draft: &WizardDraft, now: DateTime<Utc>) -> Vec<String> {
    let mut errors = Vec::new();
    let title = draft.title.trim();
    if title.is_empty() {
        errors.push("Title is required".to_string());
    } else if title.chars().count() > 200 {
        errors.push("Title must be at most 200 characters".to_string());
    }
    if let Some(due) = draft.due_date {
        if due < now {
            errors.push("Due date cannot be in the past".to_string());
        }
    }
    errors
}

fn products_errors(draft: &WizardDraft) -> Vec<String> {
    if draft.items.is_empty() {
        return vec!["Add at least one product".to_string()];
    }
    let mut errors = Vec::new();
    let mut seen = Vec::with_capacity(draft.items.len());
    for (n, item) in draft.items.iter().enumerate() {
        if seen.contains(&item.product_id) {
            errors.push(format!("Line {}: product is listed twice", n + 1));
        }
        seen.push(item.product_id);
    }
    errors
}

fn pricing_errors(draft: &WizardDraft) -> Vec<String> {
    let mut errors = Vec::new();
    if let Some(currency) = &draft.currency {
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            errors.push(format!("Invalid currency code: {}", currency));
        }
    }
    for (n, item) in draft.items.iter().enumerate() {
        let line = n + 1;
        if !(item.quantity > 0.0) {
            errors.push(format!("Line {}: quantity must be positive", line));
        }
        if matches!(item.unit_price, Some(p) if p < 0.0) {
            errors.push(format!("Line {}: unit price cannot be negative", line));
        }
        if !(0.0..=100.0).contains(&item.discount_percent) {
            errors.push(format!("Line {}: discount must be between 0 and 100", line));
        }
    }
    errors
}

/// Errors for one step. Review re-checks everything before it.
pub fn validate_step(step: WizardStep, draft: &WizardDraft) -> Vec<String> {
    let now = Utc::now();
    match step {
        WizardStep::Customer => customer_errors(draft),
        WizardStep::Details => details_errors(draft, now),
        WizardStep::Products => products_errors(draft),
        WizardStep::Pricing => pricing_errors(draft),
        WizardStep::Review => WizardStep::ALL[..WizardStep::Review.index()]
            .iter()
            .flat_map(|&s| validate_step(s, draft))
            .collect(),
    }
}

/// Non-empty error lists keyed by step
pub fn validate_all(draft: &WizardDraft) -> BTreeMap<WizardStep, Vec<String>> {
    WizardStep::ALL[..WizardStep::Review.index()]
        .iter()
        .map(|&step| (step, validate_step(step, draft)))
        .filter(|(_, errors)| !errors.is_empty())
        .collect()
}

/// Answer of the draft validation endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WizardValidation {
    pub valid: bool,
    pub errors: BTreeMap<WizardStep, Vec<String>>,
}

impl WizardValidation {
    pub fn of(draft: &WizardDraft) -> Self {
        let errors = validate_all(draft);
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProposalWizard {
    step: WizardStep,
    draft: WizardDraft,
}

impl ProposalWizard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resume(step: WizardStep, draft: WizardDraft) -> Self {
        Self { step, draft }
    }

    pub fn step(&self) -> WizardStep {
        self.step
    }

    pub fn draft(&self) -> &WizardDraft {
        &self.draft
    }

    pub fn update_draft(&mut self, edit: impl FnOnce(&mut WizardDraft)) {
        edit(&mut self.draft);
    }

    pub fn current_errors(&self) -> Vec<String> {
        validate_step(self.step, &self.draft)
    }

    /// Advance only when the current step validates
    pub fn next_step(&mut self) -> Result<WizardStep, WizardError> {
        let errors = self.current_errors();
        if !errors.is_empty() {
            return Err(WizardError::Invalid {
                step: self.step,
                errors,
            });
        }
        let next = self.step.next().ok_or(WizardError::AtLastStep)?;
        self.step = next;
        Ok(next)
    }

    /// Going back never validates; stays put on the first step
    pub fn prev_step(&mut self) -> WizardStep {
        if let Some(prev) = self.step.prev() {
            self.step = prev;
        }
        self.step
    }

    /// Jump backwards freely, forwards only over valid steps
    pub fn go_to(&mut self, target: WizardStep) -> Result<(), WizardError> {
        if target > self.step {
            let blocking = WizardStep::ALL[..target.index()]
                .iter()
                .copied()
                .find(|&s| !validate_step(s, &self.draft).is_empty());
            if let Some(blocking) = blocking {
                return Err(WizardError::Blocked { target, blocking });
            }
        }
        self.step = target;
        Ok(())
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Percentage of the way through, 0 on the first step
    pub fn progress(&self) -> u8 {
        let last = WizardStep::ALL.len() - 1;
        (self.step.index() * 100 / last) as u8
    }

    /// Final input for `ProposalService::create`
    pub fn into_create_input(self) -> Result<CreateProposal, WizardError> {
        if let Some((&step, errors)) = validate_all(&self.draft).iter().next() {
            return Err(WizardError::Invalid {
                step,
                errors: errors.clone(),
            });
        }
        let draft = self.draft;
        let customer_id = draft.customer_id.ok_or(WizardError::Invalid {
            step: WizardStep::Customer,
            errors: vec!["Select a customer".to_string()],
        })?;

        Ok(CreateProposal {
            title: draft.title.trim().to_string(),
            description: draft.description,
            customer_id,
            owner_id: None,
            priority: draft.priority,
            currency: draft.currency.map(|c| c.to_uppercase()),
            due_date: draft.due_date,
            items: draft.items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn item(quantity: f64, discount_percent: f64) -> ProposalItemInput {
        ProposalItemInput {
            product_id: Uuid::new_v4(),
            description: None,
            quantity,
            unit_price: Some(120.0),
            discount_percent,
        }
    }

    fn filled() -> ProposalWizard {
        let mut wizard = ProposalWizard::new();
        wizard.update_draft(|d| {
            d.customer_id = Some(Uuid::new_v4());
            d.title = "Warehouse automation".into();
            d.due_date = Some(Utc::now() + Duration::days(7));
            d.items = vec![item(2.0, 10.0)];
        });
        wizard
    }

    #[test]
    fn next_step_blocks_while_errors_remain() {
        let mut wizard = ProposalWizard::new();
        let err = wizard.next_step().unwrap_err();
        assert_eq!(
            err,
            WizardError::Invalid {
                step: WizardStep::Customer,
                errors: vec!["Select a customer".into()],
            }
        );
        assert_eq!(wizard.step(), WizardStep::Customer);

        wizard.update_draft(|d| d.customer_id = Some(Uuid::new_v4()));
        assert_eq!(wizard.next_step().unwrap(), WizardStep::Details);
    }

    #[test]
    fn walks_to_review_and_builds_input() {
        let mut wizard = filled();
        while wizard.step() != WizardStep::Review {
            wizard.next_step().unwrap();
        }
        assert_eq!(wizard.progress(), 100);
        assert_eq!(wizard.next_step().unwrap_err(), WizardError::AtLastStep);

        let input = wizard.into_create_input().unwrap();
        assert_eq!(input.title, "Warehouse automation");
        assert_eq!(input.items.len(), 1);
    }

    #[test]
    fn pricing_rejects_bad_lines() {
        let mut wizard = filled();
        wizard.update_draft(|d| {
            d.items = vec![item(0.0, 10.0), item(1.0, 150.0)];
            d.currency = Some("EURO".into());
        });
        let errors = validate_step(WizardStep::Pricing, wizard.draft());
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn go_to_forward_reports_blocking_step() {
        let mut wizard = ProposalWizard::new();
        wizard.update_draft(|d| d.customer_id = Some(Uuid::new_v4()));

        let err = wizard.go_to(WizardStep::Pricing).unwrap_err();
        assert_eq!(
            err,
            WizardError::Blocked {
                target: WizardStep::Pricing,
                blocking: WizardStep::Details,
            }
        );

        wizard.go_to(WizardStep::Details).unwrap();
        assert_eq!(wizard.prev_step(), WizardStep::Customer);
        assert_eq!(wizard.prev_step(), WizardStep::Customer);
    }

    #[test]
    fn reset_clears_everything() {
        let mut wizard = filled();
        wizard.next_step().unwrap();
        wizard.reset();
        assert_eq!(wizard.step(), WizardStep::Customer);
        assert_eq!(wizard.draft(), &WizardDraft::default());
    }

    #[test]
    fn validate_all_lists_only_failing_steps() {
        let mut draft = filled().draft().clone();
        draft.title.clear();
        let errors = validate_all(&draft);
        assert_eq!(errors.keys().copied().collect::<Vec<_>>(), vec![WizardStep::Details]);

        let report = WizardValidation::of(&draft);
        assert!(!report.valid);
        assert_eq!(
            serde_json::to_value(&report).unwrap()["errors"]["details"][0],
            "Title is required"
        );
    }
}
