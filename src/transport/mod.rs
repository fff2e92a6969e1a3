pub mod bt_discovery;
pub mod rfcomm;
pub mod traits;

pub use bt_discovery::{BtDiscovery, BtDiscoveryConfig, DiscoveredDevice};
pub use rfcomm::{RfcommChannel, RfcommConfig, RfcommTransport};
pub use traits::{ChannelStream, Transport};
