//! Payment saga constants.

use std::time::Duration;

/// The saga type identifier for the payment flow.
pub const SAGA_TYPE: &str = "PaymentSaga";

/// Step name: capture the authorized funds.
pub const STEP_PROCESS_PAYMENT: &str = "process_payment";

/// Step name: settle the captured funds to the merchant.
pub const STEP_SETTLE_PAYMENT: &str = "settle_payment";

/// Step name: release the authorization hold (compensation).
pub const STEP_VOID_AUTHORIZATION: &str = "void_authorization";

/// How long a saga may stay non-terminal, measured from its start.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5 * 60);

/// How long a deadline-triggered void may stay unanswered.
pub const DEFAULT_COMPENSATION_DEADLINE: Duration = Duration::from_secs(5 * 60);

/// Number of recent event IDs remembered per saga for duplicate detection.
pub const DEFAULT_PROCESSED_EVENT_CAPACITY: usize = 64;
