//! 数据访问层 (DAO) - 每张表一个专门的操作模块
//!
//! 这里封装了所有数据库操作，确保：
//! - 数据操作的一致性和封装性
//! - 实体与行的统一映射
//! - 业务层不直接拼 SQL

pub mod account;
pub mod device;
pub mod forward_log;
pub mod link;
pub mod message;
pub mod rule;

pub use account::AccountDao;
pub use device::DeviceDao;
pub use forward_log::ForwardLogDao;
pub use link::LinkDao;
pub use message::MessageDao;
pub use rule::RuleDao;
