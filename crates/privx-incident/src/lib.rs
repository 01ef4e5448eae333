//! privx-incident: alarms and the notification channel.
//!
//! Factory functions map a watched resource and a threshold to an
//! [`Alarm`] whose comparison, evaluation window and missing-data policy
//! are fixed per [`AlarmKind`]. [`fmap`] binds an alarm's raised and
//! cleared transitions to the deployment's [`Topic`].
//!
//! # Alarm kinds
//!
//! ```text
//! nodes          ServiceOverload, ServiceInDebt
//! load balancer  HighAvailability, ServiceAvailability
//! database       DbOverload, DbInDebt, DbOutOfDisk, DbOutOfMem, DbStorageInDebt
//! ```

pub mod alarm;
pub mod channel;

pub use alarm::{
    Alarm, AlarmKind, AlarmParams, Comparison, Dimensions, MissingData, db_in_debt, db_out_of_disk,
    db_out_of_mem, db_overload, db_storage_in_debt, fmap, high_availability, service_availability,
    service_in_debt, service_overload,
};
pub use channel::{Topic, channel};
