use crate::coordination::CoordinationClient;
use crate::error::GBError;
use crate::messages::transport::Endpoint;
use crate::messages::wire::{Payload, WireFrame};
use crate::worker::protocol::{Command, COMMAND_KEY};
use gb_api::{GraphValue, WorkerId};
use hashbrown::HashMap;
use log::debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// One worker's side of the data exchanges that belong to a command.
///
/// Every exchange ends with an `End` frame from each peer that carries the number of data frames
/// the peer sent. Frames of a later command are kept for later and frames of an abandoned command
/// are dropped.
pub struct Exchange<V, E, M> {
    worker_id: WorkerId,
    endpoint: Endpoint,
    client: CoordinationClient,
    poll_interval: Duration,
    // Data frames sent to each worker during the running exchange.
    sent: Vec<AtomicU64>,
    stash: Vec<WireFrame<V, E, M>>,
}

impl<V: GraphValue, E: GraphValue, M: GraphValue> Exchange<V, E, M> {
    pub fn new(
        endpoint: Endpoint,
        client: CoordinationClient,
        workers: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            worker_id: endpoint.worker_id(),
            endpoint,
            client,
            poll_interval,
            sent: (0..workers).map(|_| AtomicU64::new(0)).collect(),
            stash: Vec::new(),
        }
    }

    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    /// Starts a new exchange.
    pub fn begin(&mut self) {
        for sent in &self.sent {
            sent.store(0, Ordering::SeqCst);
        }
    }

    /// Sends one data frame. Safe to call from several threads.
    pub fn send(
        &self,
        sequence: u64,
        destination: WorkerId,
        payload: Payload<V, E, M>,
    ) -> Result<(), GBError> {
        self.endpoint.send(&WireFrame::new(sequence, self.worker_id, destination, payload))?;
        if let Some(sent) = self.sent.get(destination as usize) {
            sent.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Tells every peer of `command` that all frames were sent.
    pub fn finish(&self, command: &Command) -> Result<(), GBError> {
        for peer in command.peers_of(self.worker_id) {
            let frames =
                self.sent.get(peer as usize).map_or(0, |sent| sent.load(Ordering::SeqCst));
            let end: WireFrame<V, E, M> =
                WireFrame::new(command.sequence, self.worker_id, peer, Payload::End { frames });
            self.endpoint.send(&end)?;
        }
        Ok(())
    }

    /// Receives the frames of `command` until every peer finished, handing each data payload to
    /// `apply`. Returns `false` without waiting further once a newer command was published.
    pub fn drain(
        &mut self,
        command: &Command,
        mut apply: impl FnMut(Payload<V, E, M>) -> Result<(), GBError>,
    ) -> Result<bool, GBError> {
        let sequence = command.sequence;
        let mut received: HashMap<WorkerId, u64> =
            command.peers_of(self.worker_id).map(|peer| (peer, 0)).collect();
        let mut pending = received.len();

        let (ready, later): (Vec<_>, Vec<_>) = std::mem::take(&mut self.stash)
            .into_iter()
            .filter(|frame| frame.sequence >= sequence)
            .partition(|frame| frame.sequence == sequence);
        self.stash = later;
        for frame in ready {
            if accept(frame, &mut received, &mut apply)? {
                pending -= 1;
            }
        }

        while pending > 0 {
            match self.endpoint.receive(self.poll_interval)? {
                Some(frame) if frame.sequence == sequence => {
                    if accept(frame, &mut received, &mut apply)? {
                        pending -= 1;
                    }
                }
                Some(frame) if frame.sequence > sequence => self.stash.push(frame),
                Some(frame) => debug!(
                    "Worker {} dropped a frame of abandoned command {} from worker {}",
                    self.worker_id, frame.sequence, frame.source
                ),
                None => {
                    if self.superseded(sequence)? {
                        return Ok(false);
                    }
                }
            }
        }
        Ok(true)
    }

    fn superseded(&self, sequence: u64) -> Result<bool, GBError> {
        Ok(self
            .client
            .get_object::<Command>(COMMAND_KEY)?
            .map_or(false, |(command, _)| command.sequence > sequence))
    }
}

/// Handles one frame of the running exchange. Returns whether it was the sender's last.
fn accept<V, E, M>(
    frame: WireFrame<V, E, M>,
    received: &mut HashMap<WorkerId, u64>,
    apply: &mut impl FnMut(Payload<V, E, M>) -> Result<(), GBError>,
) -> Result<bool, GBError> {
    let count = received.get_mut(&frame.source).ok_or_else(|| {
        GBError::Transport(format!(
            "Worker {} is not part of command {}",
            frame.source, frame.sequence
        ))
    })?;
    match frame.payload {
        Payload::End { frames } => {
            if *count != frames {
                return Err(GBError::Transport(format!(
                    "Worker {} sent {} frames for command {}, {} arrived",
                    frame.source, frames, frame.sequence, count
                )));
            }
            Ok(true)
        }
        payload => {
            *count += 1;
            apply(payload)?;
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::JobConfig;
    use crate::coordination::{CoordinationClient, LocalCoordinator};
    use crate::messages::transport::Network;
    use crate::messages::wire::Payload;
    use crate::partition::PartitionOwners;
    use crate::worker::exchange::Exchange;
    use crate::worker::protocol::{Command, CommandKind, COMMAND_KEY};
    use std::sync::Arc;
    use std::time::Duration;

    type TestExchange = Exchange<u64, (), u64>;

    fn exchanges(workers: usize) -> (CoordinationClient, Vec<TestExchange>) {
        let client =
            CoordinationClient::new(Arc::new(LocalCoordinator::default()), &JobConfig::default());
        let exchanges = Network::connect(workers)
            .into_iter()
            .map(|endpoint| {
                Exchange::new(endpoint, client.clone(), workers, Duration::from_millis(2))
            })
            .collect();
        (client, exchanges)
    }

    fn command(sequence: u64, workers: Vec<u32>) -> Command {
        let owners = PartitionOwners::round_robin(4, &workers).unwrap();
        Command::new(sequence, owners, workers, CommandKind::Migrate)
    }

    #[test]
    fn frames_of_later_commands_wait() {
        let (_, mut exchanges) = exchanges(2);
        let first = command(1, vec![0, 1]);
        let second = command(2, vec![0, 1]);

        // Worker 1 is already one command ahead.
        exchanges[1].send(2, 0, Payload::Messages(vec![(5, 50)])).unwrap();
        exchanges[1].finish(&second).unwrap();
        exchanges[1].begin();
        exchanges[1].send(1, 0, Payload::Messages(vec![(4, 40)])).unwrap();
        exchanges[1].finish(&first).unwrap();

        let mut received = Vec::new();
        assert!(exchanges[0]
            .drain(&first, |payload| {
                received.push(payload);
                Ok(())
            })
            .unwrap());
        assert_eq!(received, vec![Payload::Messages(vec![(4, 40)])]);

        received.clear();
        assert!(exchanges[0]
            .drain(&second, |payload| {
                received.push(payload);
                Ok(())
            })
            .unwrap());
        assert_eq!(received, vec![Payload::Messages(vec![(5, 50)])]);
    }

    #[test]
    fn newer_command_abandons_the_exchange() {
        let (client, mut exchanges) = exchanges(2);
        let first = command(1, vec![0, 1]);
        client.put_object(COMMAND_KEY, &command(2, vec![0])).unwrap();
        assert!(!exchanges[0].drain(&first, |_| Ok(())).unwrap());
    }

    #[test]
    fn single_worker_needs_no_frames() {
        let (_, mut exchanges) = exchanges(1);
        assert!(exchanges[0].drain(&command(1, vec![0]), |_| Ok(())).unwrap());
    }
}
