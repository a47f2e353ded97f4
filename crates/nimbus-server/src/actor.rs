use log::error;
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle, JoinSet};

const ACTOR_CHANNEL_SIZE: usize = 16;

pub trait Actor: Sized + Send + 'static {
    type Message: Send + 'static;
    type Options;
    type Error: From<mpsc::error::SendError<Self::Message>> + std::fmt::Display + Send;

    fn name() -> &'static str;
    fn new(options: Self::Options) -> Self;
    fn start(&mut self, ctx: &mut ActorContext<Self>) -> Result<(), Self::Error>;
    /// Process one message and return the next action.
    /// This method should only return errors that are not recoverable;
    /// the actor is stopped when it does. It must not block: all messages
    /// are processed sequentially on one task, so long-running or async
    /// work belongs in tasks spawned via [ActorContext::spawn].
    fn receive(
        &mut self,
        ctx: &mut ActorContext<Self>,
        message: Self::Message,
    ) -> Result<ActorAction, Self::Error>;
    fn stop(self) -> Result<(), Self::Error>;
}

pub enum ActorAction {
    Continue,
    Stop,
}

pub struct ActorContext<T: Actor> {
    handle: ActorHandle<T>,
    /// Tasks spawned by the actor while processing messages. All of them
    /// are aborted when the context is dropped.
    tasks: JoinSet<Result<(), T::Error>>,
}

impl<T: Actor> ActorContext<T> {
    fn new(handle: &ActorHandle<T>) -> Self {
        Self {
            handle: handle.clone(),
            tasks: JoinSet::new(),
        }
    }

    pub fn handle(&self) -> &ActorHandle<T> {
        &self.handle
    }

    pub fn spawn(
        &mut self,
        task: impl std::future::Future<Output = Result<(), T::Error>> + Send + 'static,
    ) -> AbortHandle {
        self.tasks.spawn(task)
    }

    /// Join tasks that have completed and log unhandled errors. An actor
    /// that wants to react to a task failure should send itself a message
    /// from within the task instead.
    fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("{} task failed: {e}", T::name()),
                Err(e) => error!("failed to join task spawned by {}: {e}", T::name()),
            }
        }
    }
}

pub struct ActorHandle<T: Actor> {
    sender: mpsc::Sender<T::Message>,
    stopped: watch::Receiver<bool>,
}

impl<T: Actor> Clone for ActorHandle<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            stopped: self.stopped.clone(),
        }
    }
}

impl<T: Actor> ActorHandle<T> {
    pub async fn send(&self, message: T::Message) -> Result<(), T::Error> {
        self.sender.send(message).await.map_err(T::Error::from)
    }

    /// Waits until the actor event loop has exited. A receiver error means
    /// the sender side is gone, which also implies the actor has stopped.
    pub async fn wait_for_stop(mut self) {
        let _ = self.stopped.wait_for(|x| *x).await;
    }
}

/// Owns the event-loop tasks of one or more actors so a caller can spawn
/// them and then wait for all of them to finish.
pub struct ActorSystem {
    tasks: Vec<JoinHandle<()>>,
}

impl Default for ActorSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl ActorSystem {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    pub fn spawn<T: Actor>(&mut self, options: T::Options) -> ActorHandle<T> {
        let (tx, rx) = mpsc::channel(ACTOR_CHANNEL_SIZE);
        let (stopped_tx, stopped_rx) = watch::channel::<bool>(false);
        let handle = ActorHandle {
            sender: tx,
            stopped: stopped_rx,
        };
        let runner = ActorRunner {
            actor: T::new(options),
            ctx: ActorContext::new(&handle),
            receiver: rx,
            stopped: stopped_tx,
        };
        self.tasks.push(tokio::spawn(runner.run()));
        handle
    }

    pub async fn join(self) {
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

struct ActorRunner<T: Actor> {
    actor: T,
    ctx: ActorContext<T>,
    receiver: mpsc::Receiver<T::Message>,
    stopped: watch::Sender<bool>,
}

impl<T: Actor> ActorRunner<T> {
    async fn run(mut self) {
        let out = async {
            self.actor.start(&mut self.ctx)?;
            while let Some(message) = self.receiver.recv().await {
                match self.actor.receive(&mut self.ctx, message)? {
                    ActorAction::Continue => {}
                    ActorAction::Stop => break,
                }
                self.ctx.reap();
            }
            self.actor.stop()
        }
        .await;
        if let Err(e) = out {
            error!("{} failed: {e}", T::name());
        }
        let _ = self.stopped.send(true);
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::oneshot;

    use super::*;

    struct CounterActor {
        total: u64,
    }

    #[derive(Clone, Debug)]
    struct TestError;

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "test error")
        }
    }

    impl<T> From<mpsc::error::SendError<T>> for TestError {
        fn from(_: mpsc::error::SendError<T>) -> Self {
            Self
        }
    }

    enum CounterMessage {
        Add(u64),
        Total { reply: oneshot::Sender<u64> },
        Stop,
    }

    impl Actor for CounterActor {
        type Message = CounterMessage;
        type Options = ();
        type Error = TestError;

        fn name() -> &'static str {
            "CounterActor"
        }

        fn new(_options: Self::Options) -> Self {
            Self { total: 0 }
        }

        fn start(&mut self, _: &mut ActorContext<Self>) -> Result<(), Self::Error> {
            Ok(())
        }

        fn receive(
            &mut self,
            _: &mut ActorContext<Self>,
            message: Self::Message,
        ) -> Result<ActorAction, Self::Error> {
            match message {
                CounterMessage::Add(n) => {
                    self.total += n;
                    Ok(ActorAction::Continue)
                }
                CounterMessage::Total { reply } => {
                    let _ = reply.send(self.total);
                    Ok(ActorAction::Continue)
                }
                CounterMessage::Stop => Ok(ActorAction::Stop),
            }
        }

        fn stop(self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_actor_processes_messages_in_order() {
        let mut system = ActorSystem::new();
        let handle = system.spawn::<CounterActor>(());
        handle.send(CounterMessage::Add(1)).await.unwrap();
        handle.send(CounterMessage::Add(2)).await.unwrap();
        let (tx, rx) = oneshot::channel();
        handle.send(CounterMessage::Total { reply: tx }).await.unwrap();
        assert_eq!(rx.await, Ok(3));
    }

    #[tokio::test]
    async fn test_actor_system_join_after_stop() {
        let mut system = ActorSystem::new();
        let handle = system.spawn::<CounterActor>(());
        handle.send(CounterMessage::Stop).await.unwrap();
        handle.clone().wait_for_stop().await;
        system.join().await;
    }
}
