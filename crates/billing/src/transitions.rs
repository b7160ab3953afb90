//! Subscription lifecycle transition table
//!
//! Every legal status change is one [`Rule`] keyed by
//! `(current status, event kind)`. The table is validated when it is built:
//! a rule whose fixed target is not an edge of the lifecycle state machine,
//! or two rules for the same key, fail construction.
//!
//! | current             | event                  | new                      | side effects |
//! |---------------------|------------------------|--------------------------|--------------|
//! | trial, trial_expired| checkout_completed     | active                   | clear trial, set plan, reset usage, reactivate, confirmation email |
//! | trial               | trial_reminder         | unchanged                | reminder email |
//! | trial               | trial_expired          | trial_expired (guarded)  | suspend, expired email |
//! | active, past_due    | invoice_payment_failed | past_due                 | payment failed email |
//! | active, past_due    | invoice_paid           | active                   | reset usage, receipt email |
//! | active, past_due    | subscription_deleted   | cancelled                | cancellation email |
//! | any                 | subscription_updated   | processor status         | audit only |
//! | any                 | subscription_created   | unchanged                | audit only |
//! | any                 | trial_will_end         | unchanged                | reminder email |

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::email::EmailCategory;
use crate::events::BillingEventType;
use crate::tenant::SubscriptionStatus;

/// Kinds of transition requests, from either the sweep or the processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    CheckoutCompleted,
    TrialReminder,
    TrialExpired,
    InvoicePaymentFailed,
    InvoicePaid,
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionDeleted,
    TrialWillEnd,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::CheckoutCompleted => "checkout_completed",
            EventKind::TrialReminder => "trial_reminder",
            EventKind::TrialExpired => "trial_expired",
            EventKind::InvoicePaymentFailed => "invoice_payment_failed",
            EventKind::InvoicePaid => "invoice_paid",
            EventKind::SubscriptionCreated => "subscription_created",
            EventKind::SubscriptionUpdated => "subscription_updated",
            EventKind::SubscriptionDeleted => "subscription_deleted",
            EventKind::TrialWillEnd => "trial_will_end",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a rule moves the status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTarget {
    To(SubscriptionStatus),
    Unchanged,
    /// Follow the status the processor reported, when that is a legal edge
    MirrorProcessor,
}

/// Extra precondition on the stored tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    /// No processor subscription recorded yet; a checkout that already
    /// landed must not be downgraded by the expiry sweep
    NoExternalSubscription,
}

/// Hosted assistant toggle fired after the status write commits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceAction {
    Suspend,
    Reactivate,
}

/// Tenant fields written together with the status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FieldEffects {
    pub clear_trial_ends_at: bool,
    /// Copy plan and processor ids from the request onto the tenant
    pub assign_subscription: bool,
    pub reset_usage: bool,
}

impl FieldEffects {
    pub const NONE: FieldEffects = FieldEffects {
        clear_trial_ends_at: false,
        assign_subscription: false,
        reset_usage: false,
    };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub from: SubscriptionStatus,
    pub event: EventKind,
    pub guard: Option<Guard>,
    pub target: StatusTarget,
    pub fields: FieldEffects,
    pub service: Option<ServiceAction>,
    pub notify: Option<EmailCategory>,
    pub audit: BillingEventType,
}

impl Rule {
    /// Whether the stored tenant satisfies this rule's guard
    pub fn guard_allows(&self, has_external_subscription: bool) -> bool {
        match self.guard {
            None => true,
            Some(Guard::NoExternalSubscription) => !has_external_subscription,
        }
    }

    /// Resolve the target status, given what the processor reported (if anything).
    ///
    /// Mirrored statuses only move between paid states along legal edges;
    /// anything else leaves the status where it is.
    pub fn resolve_target(&self, reported: Option<SubscriptionStatus>) -> SubscriptionStatus {
        match self.target {
            StatusTarget::To(status) => status,
            StatusTarget::Unchanged => self.from,
            StatusTarget::MirrorProcessor => match reported {
                Some(status)
                    if self.from.is_paid()
                        && status.is_paid()
                        && self.from.can_transition_to(&status) =>
                {
                    status
                }
                _ => self.from,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionTableError {
    #[error("{event} cannot move {from} to {to}: not a lifecycle edge")]
    IllegalEdge {
        from: SubscriptionStatus,
        to: SubscriptionStatus,
        event: EventKind,
    },
    #[error("duplicate rule for ({from}, {event})")]
    DuplicateRule {
        from: SubscriptionStatus,
        event: EventKind,
    },
    #[error("rule ({from}, {event}) clears the trial end but stays in trial")]
    TrialClearedInTrial {
        from: SubscriptionStatus,
        event: EventKind,
    },
}

/// Validated lookup table of lifecycle rules
#[derive(Debug, Clone)]
pub struct TransitionTable {
    rules: HashMap<(SubscriptionStatus, EventKind), Rule>,
}

impl TransitionTable {
    pub fn build(rules: Vec<Rule>) -> Result<Self, TransitionTableError> {
        let mut table = HashMap::with_capacity(rules.len());

        for rule in rules {
            if let StatusTarget::To(to) = rule.target {
                if !rule.from.can_transition_to(&to) {
                    return Err(TransitionTableError::IllegalEdge {
                        from: rule.from,
                        to,
                        event: rule.event,
                    });
                }
                if rule.fields.clear_trial_ends_at && to == SubscriptionStatus::Trial {
                    return Err(TransitionTableError::TrialClearedInTrial {
                        from: rule.from,
                        event: rule.event,
                    });
                }
            }

            let key = (rule.from, rule.event);
            if table.insert(key, rule).is_some() {
                return Err(TransitionTableError::DuplicateRule {
                    from: key.0,
                    event: key.1,
                });
            }
        }

        Ok(Self { rules: table })
    }

    /// The canonical lifecycle table
    pub fn standard() -> Result<Self, TransitionTableError> {
        use SubscriptionStatus::*;

        let mut rules = Vec::new();

        for from in [Trial, TrialExpired] {
            rules.push(Rule {
                from,
                event: EventKind::CheckoutCompleted,
                guard: None,
                target: StatusTarget::To(Active),
                fields: FieldEffects {
                    clear_trial_ends_at: true,
                    assign_subscription: true,
                    reset_usage: true,
                },
                service: Some(ServiceAction::Reactivate),
                notify: Some(EmailCategory::PaymentConfirmation),
                audit: BillingEventType::CheckoutCompleted,
            });
        }

        rules.push(Rule {
            from: Trial,
            event: EventKind::TrialReminder,
            guard: None,
            target: StatusTarget::Unchanged,
            fields: FieldEffects::NONE,
            service: None,
            notify: Some(EmailCategory::TrialReminder),
            audit: BillingEventType::TrialReminderSent,
        });

        rules.push(Rule {
            from: Trial,
            event: EventKind::TrialExpired,
            guard: Some(Guard::NoExternalSubscription),
            target: StatusTarget::To(TrialExpired),
            fields: FieldEffects {
                clear_trial_ends_at: true,
                ..FieldEffects::NONE
            },
            service: Some(ServiceAction::Suspend),
            notify: Some(EmailCategory::TrialExpired),
            audit: BillingEventType::TrialExpired,
        });

        for from in [Active, PastDue] {
            rules.push(Rule {
                from,
                event: EventKind::InvoicePaymentFailed,
                guard: None,
                target: StatusTarget::To(PastDue),
                fields: FieldEffects::NONE,
                service: None,
                notify: Some(EmailCategory::PaymentFailed),
                audit: BillingEventType::PaymentFailed,
            });

            rules.push(Rule {
                from,
                event: EventKind::InvoicePaid,
                guard: None,
                target: StatusTarget::To(Active),
                fields: FieldEffects {
                    reset_usage: true,
                    ..FieldEffects::NONE
                },
                service: None,
                notify: Some(EmailCategory::PaymentReceipt),
                audit: BillingEventType::PaymentSucceeded,
            });

            rules.push(Rule {
                from,
                event: EventKind::SubscriptionDeleted,
                guard: None,
                target: StatusTarget::To(Cancelled),
                fields: FieldEffects::NONE,
                service: None,
                notify: Some(EmailCategory::SubscriptionCancelled),
                audit: BillingEventType::SubscriptionCancelled,
            });
        }

        for from in SubscriptionStatus::ALL {
            rules.push(Rule {
                from,
                event: EventKind::SubscriptionUpdated,
                guard: None,
                target: StatusTarget::MirrorProcessor,
                fields: FieldEffects::NONE,
                service: None,
                notify: None,
                audit: BillingEventType::SubscriptionUpdated,
            });

            rules.push(Rule {
                from,
                event: EventKind::SubscriptionCreated,
                guard: None,
                target: StatusTarget::Unchanged,
                fields: FieldEffects::NONE,
                service: None,
                notify: None,
                audit: BillingEventType::SubscriptionCreated,
            });

            rules.push(Rule {
                from,
                event: EventKind::TrialWillEnd,
                guard: None,
                target: StatusTarget::Unchanged,
                fields: FieldEffects::NONE,
                service: None,
                notify: Some(EmailCategory::TrialReminder),
                audit: BillingEventType::TrialWillEnd,
            });
        }

        Self::build(rules)
    }

    pub fn lookup(&self, from: SubscriptionStatus, event: EventKind) -> Option<&Rule> {
        self.rules.get(&(from, event))
    }

    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.values()
    }
}
