//! 核心层：错误类型、时间源、支付会话、优雅关闭

pub mod clock;
pub mod error;
pub mod session;
pub mod shutdown;

pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use error::{PaymentError, StoreError, TransferError};
pub use session::{PaymentSession, SessionPool};
pub use shutdown::{run_with_graceful_shutdown, ShutdownManager, ShutdownReason};
