//! 连接注册表端口
//!
//! 每个用户最多登记一条连接，新登记直接覆盖旧的（关闭旧连接是传输层的事）。

use domain::UserId;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum PushError {
    #[error("connection closed")]
    Closed,
    #[error("connection outbound buffer full")]
    Full,
}

/// 一条客户端长连接的发送句柄
///
/// 真正的 socket 写入由连接自己的任务完成，这里只往它的队列里放帧，不会等待网络。
#[derive(Debug, Clone)]
pub struct ClientConnection {
    id: Uuid,
    outbound: mpsc::Sender<String>,
}

impl ClientConnection {
    pub fn new(outbound: mpsc::Sender<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            outbound,
        }
    }

    /// 创建句柄及其对应的接收端
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }

    pub fn push(&self, frame: String) -> Result<(), PushError> {
        self.outbound.try_send(frame).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => PushError::Full,
            mpsc::error::TrySendError::Closed(_) => PushError::Closed,
        })
    }
}

pub trait ConnectionRegistry: Send + Sync {
    /// 登记连接，返回被替换掉的旧连接
    fn register(&self, user_id: UserId, connection: ClientConnection) -> Option<ClientConnection>;

    fn unregister(&self, user_id: &UserId) -> Option<ClientConnection>;

    /// 只有当前登记的仍是这条连接时才移除，避免断开的旧连接把新连接注销掉
    fn release(&self, user_id: &UserId, connection_id: Uuid) -> bool;

    fn get(&self, user_id: &UserId) -> Option<ClientConnection>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
