use crate::config::{InputMode, SendMode};

/// Control message for the pipeline. Produced by the local console and the
/// OSC listener, consumed only by the controller loop; FIFO across producers
/// with no source priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    /// Toggles Running <-> Paused. Ignored while Stopped.
    Pause,
    SelectInput(InputMode),
    SetCamera(i32),
    SetFile(String),
    SetLoop(bool),
    SetOscIp(String),
    SetOscPort(u16),
    /// Model id as listed by `ModelKind`; rejected unless Stopped.
    SetModel(String),
    SetDrawOverlay(bool),
    SetSendMode(SendMode),
    SetStreamName(String),
    StartVideo,
    StopVideo,
    StartOsc,
    StopOsc,
    /// Exit the controller loop entirely; used on application shutdown.
    Shutdown,
}

/// Sending half of the command queue, shared by every producer.
pub type CommandSender = crossbeam_channel::Sender<Command>;
pub type CommandReceiver = crossbeam_channel::Receiver<Command>;

pub fn command_queue() -> (CommandSender, CommandReceiver) {
    crossbeam_channel::unbounded()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_preserves_arrival_order() {
        let (tx, rx) = command_queue();
        let tx2 = tx.clone();
        tx.send(Command::Start).unwrap();
        tx2.send(Command::Pause).unwrap();
        tx.send(Command::Stop).unwrap();

        assert_eq!(rx.try_recv().unwrap(), Command::Start);
        assert_eq!(rx.try_recv().unwrap(), Command::Pause);
        assert_eq!(rx.try_recv().unwrap(), Command::Stop);
        assert!(rx.try_recv().is_err());
    }
}
