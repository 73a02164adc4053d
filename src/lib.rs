pub mod bridge;

// 重新导出常用类型，方便外部使用
pub use bridge::{
    config::ClientConfig,
    native::{MockConnector, MockSdk, NativeConnector, NativeSdk, UnavailableConnector},
    BridgeError, BridgeListener, BridgeOptions, BridgeResult, ClientBridge, ConvRef,
    EmptyBridgeListener, PollCadence, SessionSnapshot,
};
