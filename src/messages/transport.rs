use crate::error::GBError;
use crate::messages::wire::WireFrame;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use gb_api::WorkerId;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Reliable, ordered byte delivery between the workers of one job.
pub struct Network;

impl Network {
    /// One endpoint per worker; endpoint `i` belongs to worker `i`.
    pub fn connect(workers: usize) -> Vec<Endpoint> {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..workers).map(|_| unbounded()).unzip();
        receivers
            .into_iter()
            .enumerate()
            .map(|(worker_id, receiver)| Endpoint {
                worker_id: worker_id as WorkerId,
                peers: senders.clone(),
                receiver,
            })
            .collect()
    }
}

/// A worker's connection to all peers. Dropping it is how a worker disappears from the network.
pub struct Endpoint {
    worker_id: WorkerId,
    peers: Vec<Sender<Vec<u8>>>,
    receiver: Receiver<Vec<u8>>,
}

impl Endpoint {
    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    pub fn send<V: Serialize, E: Serialize, M: Serialize>(
        &self,
        frame: &WireFrame<V, E, M>,
    ) -> Result<(), GBError> {
        let peer = self.peers.get(frame.destination as usize).ok_or_else(|| {
            GBError::Transport(format!("Unknown worker {}", frame.destination))
        })?;
        peer.send(frame.encode()?).map_err(|_| {
            GBError::Transport(format!(
                "Worker {} is unreachable from worker {}",
                frame.destination, self.worker_id
            ))
        })
    }

    /// Waits up to `timeout` for the next frame.
    pub fn receive<V: DeserializeOwned, E: DeserializeOwned, M: DeserializeOwned>(
        &self,
        timeout: Duration,
    ) -> Result<Option<WireFrame<V, E, M>>, GBError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(bytes) => Ok(Some(WireFrame::decode(&bytes)?)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(GBError::Transport(format!("Worker {} is disconnected", self.worker_id)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::GBError;
    use crate::messages::transport::Network;
    use crate::messages::wire::{Payload, WireFrame};
    use std::time::Duration;

    #[test]
    fn frames_arrive_in_order() {
        let endpoints = Network::connect(2);
        for i in 0..10 {
            let frame: WireFrame<(), (), u64> =
                WireFrame::new(1, 0, 1, Payload::Messages(vec![(i, i)]));
            endpoints[0].send(&frame).unwrap();
        }
        for i in 0..10 {
            let frame: WireFrame<(), (), u64> =
                endpoints[1].receive(Duration::from_secs(1)).unwrap().expect("frame missing");
            assert_eq!(frame.payload, Payload::Messages(vec![(i, i)]));
        }
        let nothing: Option<WireFrame<(), (), u64>> =
            endpoints[1].receive(Duration::from_millis(1)).unwrap();
        assert!(nothing.is_none());
    }

    #[test]
    fn dead_peer_is_reported() {
        let mut endpoints = Network::connect(2);
        drop(endpoints.pop());
        let frame: WireFrame<(), (), u64> = WireFrame::new(1, 0, 1, Payload::End { frames: 0 });
        assert!(matches!(endpoints[0].send(&frame), Err(GBError::Transport(_))));
    }
}
