pub mod indicator;
pub mod io_monitor;
pub mod nvram;
pub mod power_rails;
pub mod rtc;
pub mod sampler;
pub mod serial_console;

pub use indicator::Indicator;
pub use io_monitor::{ChargeState, IoMonitor};
pub use nvram::{PersistentArray, PersistentStore};
pub use power_rails::{PowerRails, Rail};
pub use rtc::RealTimeClock;
pub use sampler::{Channel, Sampler};
pub use serial_console::SerialConsole;
