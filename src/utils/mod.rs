/// 工具模块 - 提供通用工具函数
pub mod cancel;
pub mod logging;
pub mod validation;

pub use cancel::run_cancellable;
pub use logging::LoggingConfig;
pub use validation::InputValidator;
