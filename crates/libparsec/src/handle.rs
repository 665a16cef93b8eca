//! Process-wide handle registry
//!
//! Every live resource handed out by this crate (clients, workspaces,
//! histories, mountpoints, cancellers, invitation steps) lives in a single
//! table and is referred to by an opaque [`Handle`].
//!
//! Slots are reused once released, but each reuse bumps the slot's
//! generation: a stale handle never resolves to the resource that took its
//! place.

use crate::cancel::Canceller;
use crate::invite::InvitationCtx;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use parsec_client::{Client, WorkspaceHistoryOps, WorkspaceOps};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;

static REGISTRY: Lazy<Mutex<HandleRegistry>> = Lazy::new(|| Mutex::new(HandleRegistry::default()));

/// Opaque reference to a live resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u64);

impl Handle {
    fn new(index: u32, generation: u32) -> Self {
        Self((u64::from(generation) << 32) | u64::from(index))
    }

    fn index(self) -> usize {
        (self.0 & u64::from(u32::MAX)) as usize
    }

    fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Raw value, for callers passing handles across a foreign boundary
    pub fn as_raw(self) -> u64 {
        self.0
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Client,
    Workspace,
    WorkspaceHistory,
    Mountpoint,
    Canceller,
    Invitation,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandleError {
    #[error("Handle {handle} does not exist")]
    NotFound { handle: Handle },
    #[error("Handle {handle} is a {found:?}, expected a {expected:?}")]
    WrongKind {
        handle: Handle,
        expected: HandleKind,
        found: HandleKind,
    },
    #[error("Handle {handle} is in use by another operation")]
    Busy { handle: Handle },
    #[error("Handle {handle} is not at the expected stage")]
    WrongState { handle: Handle },
}

pub(crate) enum HandleItem {
    Client {
        client: Arc<Client>,
        /// Task delivering the client's events to the registered callback
        events_forwarder: JoinHandle<()>,
    },
    Workspace {
        client: Handle,
        ops: Arc<WorkspaceOps>,
    },
    WorkspaceHistory {
        client: Handle,
        ops: Arc<WorkspaceHistoryOps>,
    },
    Mountpoint {
        workspace: Handle,
        path: PathBuf,
    },
    Canceller(Arc<Canceller>),
    /// An invitation waiting for its next step
    Invitation(Box<InvitationCtx>),
    /// An invitation whose step is running, aborting it fires the canceller
    InvitationStep(Arc<Canceller>),
}

impl HandleItem {
    fn kind(&self) -> HandleKind {
        match self {
            Self::Client { .. } => HandleKind::Client,
            Self::Workspace { .. } => HandleKind::Workspace,
            Self::WorkspaceHistory { .. } => HandleKind::WorkspaceHistory,
            Self::Mountpoint { .. } => HandleKind::Mountpoint,
            Self::Canceller(_) => HandleKind::Canceller,
            Self::Invitation(_) | Self::InvitationStep(_) => HandleKind::Invitation,
        }
    }
}

struct Slot {
    generation: u32,
    item: Option<HandleItem>,
}

#[derive(Default)]
struct HandleRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl HandleRegistry {
    fn register(&mut self, item: HandleItem) -> Handle {
        self.register_with(|handle| (item, handle))
    }

    /// Register the item built by `f`, which is given the handle it will live under
    fn register_with<T>(&mut self, f: impl FnOnce(Handle) -> (HandleItem, T)) -> T {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.generation = slot.generation.wrapping_add(1).max(1);
                let (item, value) = f(Handle::new(index, slot.generation));
                slot.item = Some(item);
                value
            }
            None => {
                let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
                let (item, value) = f(Handle::new(index, 1));
                self.slots.push(Slot {
                    generation: 1,
                    item: Some(item),
                });
                value
            }
        }
    }

    fn slot_mut(&mut self, handle: Handle) -> Result<&mut HandleItem, HandleError> {
        self.slots
            .get_mut(handle.index())
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.item.as_mut())
            .ok_or(HandleError::NotFound { handle })
    }

    fn release(&mut self, handle: Handle) -> Result<HandleItem, HandleError> {
        let item = self
            .slots
            .get_mut(handle.index())
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.item.take())
            .ok_or(HandleError::NotFound { handle })?;
        self.free.push(handle.index() as u32);
        Ok(item)
    }

    fn live(&self) -> impl Iterator<Item = (Handle, &HandleItem)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            let item = slot.item.as_ref()?;
            Some((Handle::new(index as u32, slot.generation), item))
        })
    }
}

pub(crate) fn register_handle(item: HandleItem) -> Handle {
    let kind = item.kind();
    let handle = REGISTRY.lock().register(item);
    tracing::trace!(%handle, ?kind, "Handle registered");
    handle
}

/// Register an item that needs to know its own handle
///
/// `f` runs with the registry locked and must not use it.
pub(crate) fn register_handle_with<T>(f: impl FnOnce(Handle) -> (HandleItem, T)) -> T {
    REGISTRY.lock().register_with(f)
}

/// Return the first live item accepted by `find`, registering `item` if there is none
pub(crate) fn find_or_register(
    mut find: impl FnMut(&HandleItem) -> bool,
    item: impl FnOnce() -> HandleItem,
) -> Handle {
    let mut registry = REGISTRY.lock();
    let found = registry.live().find(|(_, candidate)| find(candidate)).map(|(handle, _)| handle);
    match found {
        Some(handle) => handle,
        None => registry.register(item()),
    }
}

/// Look at a live item, `f` returns `None` when the item is not of the expected kind
pub(crate) fn borrow_from_handle<T>(
    handle: Handle,
    expected: HandleKind,
    f: impl FnOnce(&HandleItem) -> Option<T>,
) -> Result<T, HandleError> {
    let mut registry = REGISTRY.lock();
    let item = registry.slot_mut(handle)?;
    f(item).ok_or(HandleError::WrongKind {
        handle,
        expected,
        found: item.kind(),
    })
}

/// Swap the content of a live item, `f` hands the original back in `Err` when it
/// is not of the expected kind
pub(crate) fn take_and_replace<T>(
    handle: Handle,
    expected: HandleKind,
    f: impl FnOnce(HandleItem) -> Result<(HandleItem, T), HandleItem>,
) -> Result<T, HandleError> {
    let mut registry = REGISTRY.lock();
    let slot = registry
        .slots
        .get_mut(handle.index())
        .filter(|slot| slot.generation == handle.generation() && slot.item.is_some())
        .ok_or(HandleError::NotFound { handle })?;
    let item = slot.item.take().ok_or(HandleError::NotFound { handle })?;
    match f(item) {
        Ok((new_item, value)) => {
            slot.item = Some(new_item);
            Ok(value)
        }
        Err(item) => {
            let found = item.kind();
            let err = if matches!(item, HandleItem::InvitationStep(_)) {
                HandleError::Busy { handle }
            } else if found == expected {
                HandleError::WrongState { handle }
            } else {
                HandleError::WrongKind { handle, expected, found }
            };
            slot.item = Some(item);
            Err(err)
        }
    }
}

pub(crate) fn release_handle(handle: Handle) -> Result<HandleItem, HandleError> {
    let item = REGISTRY.lock().release(handle)?;
    tracing::trace!(%handle, kind = ?item.kind(), "Handle released");
    Ok(item)
}

/// Release `handle`, a live item of another kind is left in place
pub(crate) fn release_handle_of_kind(handle: Handle, expected: HandleKind) -> Result<HandleItem, HandleError> {
    let mut registry = REGISTRY.lock();
    let found = registry.slot_mut(handle)?.kind();
    if found != expected {
        return Err(HandleError::WrongKind { handle, expected, found });
    }
    let item = registry.release(handle)?;
    tracing::trace!(%handle, kind = ?found, "Handle released");
    Ok(item)
}

/// Release `handle` only if `f` accepts its item
pub(crate) fn release_handle_if(handle: Handle, f: impl FnOnce(&HandleItem) -> bool) -> Option<HandleItem> {
    let mut registry = REGISTRY.lock();
    if !f(registry.slot_mut(handle).ok()?) {
        return None;
    }
    registry.release(handle).ok()
}

/// Collect from every live item
pub(crate) fn filter_map_handles<T>(mut f: impl FnMut(Handle, &HandleItem) -> Option<T>) -> Vec<T> {
    REGISTRY
        .lock()
        .live()
        .filter_map(|(handle, item)| f(handle, item))
        .collect()
}

/// Map a stale or wrong-kind handle into the resource-appropriate variant of
/// operation errors
macro_rules! impl_from_handle_error {
    (Internal: $($error:ty),+ $(,)?) => {
        $(
            impl From<$crate::handle::HandleError> for $error {
                fn from(err: $crate::handle::HandleError) -> Self {
                    <$error>::Internal(anyhow::Error::new(err))
                }
            }
        )+
    };
    ($variant:ident: $($error:ty),+ $(,)?) => {
        $(
            impl From<$crate::handle::HandleError> for $error {
                fn from(err: $crate::handle::HandleError) -> Self {
                    tracing::debug!(error = %err, "Invalid handle");
                    <$error>::$variant
                }
            }
        )+
    };
}
pub(crate) use impl_from_handle_error;

#[cfg(test)]
mod tests {
    use super::*;

    fn canceller_item() -> HandleItem {
        HandleItem::Canceller(Arc::new(Canceller::new()))
    }

    fn is_canceller(item: &HandleItem) -> Option<()> {
        matches!(item, HandleItem::Canceller(_)).then_some(())
    }

    #[test]
    fn test_released_handle_is_not_found() {
        let handle = register_handle(canceller_item());
        assert_eq!(borrow_from_handle(handle, HandleKind::Canceller, is_canceller), Ok(()));

        assert!(release_handle(handle).is_ok());
        assert_eq!(
            borrow_from_handle(handle, HandleKind::Canceller, is_canceller),
            Err(HandleError::NotFound { handle })
        );
        assert!(release_handle(handle).is_err());
    }

    #[test]
    fn test_reused_slot_does_not_alias_stale_handle() {
        let mut registry = HandleRegistry::default();
        let first = registry.register(canceller_item());
        assert!(registry.release(first).is_ok());
        let second = registry.register(canceller_item());

        assert_eq!(first.index(), second.index());
        assert_ne!(first, second);
        assert!(registry.slot_mut(first).is_err());
        assert!(registry.slot_mut(second).is_ok());
    }

    #[test]
    fn test_wrong_kind() {
        let handle = register_handle(canceller_item());
        let res = borrow_from_handle(handle, HandleKind::Client, |item| match item {
            HandleItem::Client { client, .. } => Some(client.clone()),
            _ => None,
        });
        assert!(matches!(
            res,
            Err(HandleError::WrongKind {
                expected: HandleKind::Client,
                found: HandleKind::Canceller,
                ..
            })
        ));
        // A failed swap leaves the item in place
        let res = take_and_replace(handle, HandleKind::Invitation, |item| Err::<(HandleItem, ()), _>(item));
        assert!(matches!(res, Err(HandleError::WrongKind { .. })));
        assert_eq!(borrow_from_handle(handle, HandleKind::Canceller, is_canceller), Ok(()));
        let _ = release_handle(handle);
    }

    #[test]
    fn test_release_of_wrong_kind_keeps_item() {
        let handle = register_handle(canceller_item());
        assert!(matches!(
            release_handle_of_kind(handle, HandleKind::Invitation),
            Err(HandleError::WrongKind {
                expected: HandleKind::Invitation,
                found: HandleKind::Canceller,
                ..
            })
        ));
        assert_eq!(borrow_from_handle(handle, HandleKind::Canceller, is_canceller), Ok(()));

        assert!(release_handle_of_kind(handle, HandleKind::Canceller).is_ok());
        assert!(matches!(
            release_handle_of_kind(handle, HandleKind::Canceller),
            Err(HandleError::NotFound { .. })
        ));
    }
}
