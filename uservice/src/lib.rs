//! # Microservice Helpers
//!
//! Request/response helpers layered over [`SysCallApi`].
//!
//! A microservice is an execution that answers [`ServicePackage`] requests
//! arriving in its mailbox. Clients locate it by name with [`initialise`]
//! and call it with [`request_blocker`]; the service side runs [`serve`].
//!
//! Both sides only use the public syscall surface, so they work against any
//! [`SysCallApi`] implementation.

use core_types::{ExecutionIndex, SysEvent};
use ipc::ServicePackage;
use kernel_api::abi::{MAX_MESSAGE_LEN, MAX_SERVICE_HANDLE};
use kernel_api::{KernelError, SysCallApi};
use tracing::{debug, warn};

/// Handle of a located microservice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceHandle(u32);

impl ServiceHandle {
    pub fn as_raw(&self) -> u32 {
        self.0
    }

    /// Execution hosting the service
    pub fn destination(&self) -> ExecutionIndex {
        ExecutionIndex(self.0 as u8)
    }
}

/// Locates the microservice registered as `name`
pub fn initialise<K>(kernel: &K, name: &str) -> Result<ServiceHandle, KernelError>
where
    K: SysCallApi + ?Sized,
{
    let index = kernel
        .execution_index_by_name(name)
        .map_err(|_| KernelError::NotFound)?;
    let handle = u32::from(index.as_u8());
    if handle >= MAX_SERVICE_HANDLE {
        return Err(KernelError::NotFound);
    }
    Ok(ServiceHandle(handle))
}

/// Sends `request` and blocks until the matching response arrives
///
/// Responses for other operations are consumed and dropped. Fails with
/// `Timeout` once `timeout_ms` has elapsed without a match.
pub fn request_blocker<K>(
    kernel: &K,
    handle: ServiceHandle,
    request: &ServicePackage,
    timeout_ms: u32,
) -> Result<ServicePackage, KernelError>
where
    K: SysCallApi + ?Sized,
{
    if handle.as_raw() >= MAX_SERVICE_HANDLE {
        return Err(KernelError::NotFound);
    }
    let bytes = request.encode().map_err(|_| KernelError::InvalidMessage)?;
    let deadline = kernel.time_ms() + u64::from(timeout_ms);

    kernel.send_message(handle.destination(), &bytes)?;

    loop {
        if let Some((sender, bytes)) = receive_pending(kernel)? {
            match ServicePackage::decode(&bytes) {
                Ok(response) if response.operation == request.operation => return Ok(response),
                Ok(response) => debug!(
                    sender = sender.as_u8(),
                    operation = response.operation,
                    "dropping unrelated response"
                ),
                Err(err) => warn!(sender = sender.as_u8(), %err, "dropping malformed response"),
            }
            continue;
        }

        if kernel.time_ms() > deadline {
            return Err(KernelError::Timeout);
        }
        kernel.yield_now();
    }
}

/// Answers every complete request already in the mailbox
///
/// `handler` gets the sender and the decoded request; a returned package
/// is sent back to the sender. Returns the number of requests handled.
pub fn serve_pending<K, H>(kernel: &K, handler: &mut H) -> Result<usize, KernelError>
where
    K: SysCallApi + ?Sized,
    H: FnMut(ExecutionIndex, &ServicePackage) -> Option<ServicePackage>,
{
    let mut handled = 0;
    while let Some((sender, bytes)) = receive_pending(kernel)? {
        let request = match ServicePackage::decode(&bytes) {
            Ok(request) => request,
            Err(err) => {
                warn!(sender = sender.as_u8(), %err, "dropping malformed request");
                continue;
            }
        };
        handled += 1;

        let Some(response) = handler(sender, &request) else {
            continue;
        };
        let reply = response.encode().map_err(|_| KernelError::InvalidMessage)?;
        if let Err(err) = kernel.send_message(sender, &reply) {
            warn!(sender = sender.as_u8(), %err, "response not delivered");
        }
    }
    Ok(handled)
}

/// Runs the service loop
///
/// Blocks in `wait_for_event(IpcMessage)` whenever the mailbox is empty.
/// Only returns on a syscall failure; a pooled service thread is normally
/// stopped with `free_thread`.
pub fn serve<K, H>(kernel: &K, mut handler: H) -> Result<(), KernelError>
where
    K: SysCallApi + ?Sized,
    H: FnMut(ExecutionIndex, &ServicePackage) -> Option<ServicePackage>,
{
    loop {
        serve_pending(kernel, &mut handler)?;
        let status = kernel.is_message_received()?;
        if !status.received {
            kernel.wait_for_event(SysEvent::IpcMessage)?;
        }
    }
}

/// Reads one whole message if one has started arriving
fn receive_pending<K>(kernel: &K) -> Result<Option<(ExecutionIndex, Vec<u8>)>, KernelError>
where
    K: SysCallApi + ?Sized,
{
    let status = kernel.is_message_received()?;
    if !status.received || status.remaining_len == 0 {
        return Ok(None);
    }

    let mut chunk = [0u8; MAX_MESSAGE_LEN];
    let mut message = Vec::with_capacity(status.remaining_len as usize);
    loop {
        let received = kernel.receive_message(&mut chunk)?;
        message.extend_from_slice(&chunk[..received.len]);
        if received.complete {
            return Ok(Some((received.sender, message)));
        }
        if received.len == 0 {
            kernel.yield_now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_api::{StackDescriptor, ThreadState};
    use sim_kernel::test_utils::{bootstrap_pair, kernel, wait_until};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    fn sum(request: &ServicePackage) -> ServicePackage {
        let total: u32 = request.payload.iter().map(|b| u32::from(*b)).sum();
        ServicePackage::response(request, 0, total.to_le_bytes().to_vec())
    }

    #[test]
    fn test_initialise_resolves_exec_names() {
        let kernel = kernel(0);
        let handle = initialise(&kernel, "Exec5").unwrap();
        assert_eq!(handle.as_raw(), 5);
        assert_eq!(handle.destination(), ExecutionIndex(5));
        assert_eq!(initialise(&kernel, "storage"), Err(KernelError::NotFound));
    }

    #[test]
    fn test_request_served_by_pooled_thread() {
        let (client, server) = bootstrap_pair();
        let service = server.kernel.clone();
        let id = server
            .kernel
            .get_thread(
                Box::new(move || {
                    let _ = serve(&service, |_, request| Some(sum(request)));
                }),
                StackDescriptor::with_size(4096),
                1,
            )
            .unwrap();
        server.kernel.resume_thread(id).unwrap();
        assert!(wait_until(WAIT, || {
            server.kernel.thread_state(id) == Ok(ThreadState::Waiting)
        }));

        let handle = initialise(&client.kernel, "Exec1").unwrap();
        let request = ServicePackage::request(4, vec![1, 2, 3, 4]);
        let response = request_blocker(&client.kernel, handle, &request, 2000).unwrap();
        assert_eq!(response.operation, 4);
        assert_eq!(response.payload, 10u32.to_le_bytes().to_vec());

        server.kernel.free_thread(id).unwrap();
    }

    #[test]
    fn test_request_times_out_without_server() {
        let (client, _server) = bootstrap_pair();
        let handle = initialise(&client.kernel, "Exec1").unwrap();
        let request = ServicePackage::request(1, vec![1]);
        assert_eq!(
            request_blocker(&client.kernel, handle, &request, 30),
            Err(KernelError::Timeout)
        );
    }

    #[test]
    fn test_unrelated_responses_are_skipped() {
        let (client, server) = bootstrap_pair();
        let stray = ServicePackage::request(9, vec![0xEE]).encode().unwrap();
        let wanted = ServicePackage::request(5, vec![0x11]).encode().unwrap();
        server.kernel.send_message(ExecutionIndex(0), &stray).unwrap();
        server.kernel.send_message(ExecutionIndex(0), &wanted).unwrap();

        let handle = initialise(&client.kernel, "Exec1").unwrap();
        let response =
            request_blocker(&client.kernel, handle, &ServicePackage::request(5, vec![]), 2000)
                .unwrap();
        assert_eq!(response.payload, vec![0x11]);
    }

    #[test]
    fn test_oversized_request_is_rejected() {
        let (client, _server) = bootstrap_pair();
        let handle = initialise(&client.kernel, "Exec1").unwrap();
        let request = ServicePackage::request(1, vec![0; MAX_MESSAGE_LEN]);
        assert_eq!(
            request_blocker(&client.kernel, handle, &request, 100),
            Err(KernelError::InvalidMessage)
        );
    }

    #[test]
    fn test_serve_pending_answers_queued_request() {
        let (client, server) = bootstrap_pair();
        let request = ServicePackage::request(2, vec![5, 6]).encode().unwrap();
        client.kernel.send_message(ExecutionIndex(1), &request).unwrap();
        assert!(wait_until(WAIT, || {
            server
                .kernel
                .is_message_received()
                .map(|status| status.remaining_len as usize == request.len())
                .unwrap_or(false)
        }));

        let mut seen = Vec::new();
        let handled = serve_pending(&server.kernel, &mut |sender, request: &ServicePackage| {
            seen.push(sender);
            Some(sum(request))
        })
        .unwrap();
        assert_eq!(handled, 1);
        assert_eq!(seen, vec![ExecutionIndex(0)]);

        assert!(wait_until(WAIT, || {
            client
                .kernel
                .is_message_received()
                .map(|status| status.received)
                .unwrap_or(false)
        }));
        let (sender, bytes) = receive_pending(&client.kernel).unwrap().unwrap();
        assert_eq!(sender, ExecutionIndex(1));
        assert_eq!(
            ServicePackage::decode(&bytes).unwrap().payload,
            11u32.to_le_bytes().to_vec()
        );
    }
}
