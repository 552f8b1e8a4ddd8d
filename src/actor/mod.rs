mod client;
mod event;
mod replica_actor;

pub(crate) use client::ActorClient;
pub(crate) use client::ActorExited;
pub(crate) use client::WeakActorClient;
pub(crate) use event::Callback;
pub(crate) use event::Event;
pub(crate) use replica_actor::ReplicaActor;
