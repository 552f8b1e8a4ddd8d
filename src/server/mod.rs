mod server;

pub(crate) use server::RpcServer;
