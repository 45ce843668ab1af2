//! Net hub: the application-facing owner of all entities.
//!
//! The hub holds the strong references; everything it hands out is a
//! weak [`NetEntity`] handle. Dropping the hub (or removing an
//! entity) expires the handles without tearing sockets out from under
//! running tasks; live pump tasks keep their own references until
//! they finish.

use std::sync::Arc;

use parking_lot::Mutex;

use longeron_core::config::{AcceptorConfig, ConnectorConfig, UdpConfig};
use longeron_core::error::{LongeronError, Result};

use crate::acceptor::TcpAcceptor;
use crate::connector::TcpConnector;
use crate::entity::NetEntity;
use crate::udp::UdpEntity;

/// Owner of the collection of network entities.
#[derive(Default)]
pub struct NetHub {
    acceptors: Mutex<Vec<Arc<TcpAcceptor>>>,
    connectors: Mutex<Vec<Arc<TcpConnector>>>,
    udp_entities: Mutex<Vec<Arc<UdpEntity>>>,
}

/// Entities the hub can own. Sealed; implemented by the three entity
/// kinds.
pub trait HubEntity: sealed::Sealed + Sized {
    #[doc(hidden)]
    fn collection(hub: &NetHub) -> &Mutex<Vec<Arc<Self>>>;
    #[doc(hidden)]
    fn entity_is_started(&self) -> bool;
    #[doc(hidden)]
    fn entity_stop(&self) -> Result<()>;
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::TcpAcceptor {}
    impl Sealed for super::TcpConnector {}
    impl Sealed for super::UdpEntity {}
}

impl HubEntity for TcpAcceptor {
    fn collection(hub: &NetHub) -> &Mutex<Vec<Arc<Self>>> {
        &hub.acceptors
    }
    fn entity_is_started(&self) -> bool {
        self.is_started()
    }
    fn entity_stop(&self) -> Result<()> {
        self.stop()
    }
}

impl HubEntity for TcpConnector {
    fn collection(hub: &NetHub) -> &Mutex<Vec<Arc<Self>>> {
        &hub.connectors
    }
    fn entity_is_started(&self) -> bool {
        self.is_started()
    }
    fn entity_stop(&self) -> Result<()> {
        self.stop()
    }
}

impl HubEntity for UdpEntity {
    fn collection(hub: &NetHub) -> &Mutex<Vec<Arc<Self>>> {
        &hub.udp_entities
    }
    fn entity_is_started(&self) -> bool {
        self.is_started()
    }
    fn entity_stop(&self) -> Result<()> {
        self.stop()
    }
}

impl NetHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a TCP acceptor entity; nothing binds until `start`.
    pub fn make_tcp_acceptor(&self, cfg: AcceptorConfig) -> NetEntity<TcpAcceptor> {
        let entity = TcpAcceptor::new(cfg);
        let handle = NetEntity::from_arc(&entity);
        self.acceptors.lock().push(entity);
        handle
    }

    /// Create a TCP connector entity; nothing connects until `start`.
    pub fn make_tcp_connector(&self, cfg: ConnectorConfig) -> NetEntity<TcpConnector> {
        let entity = TcpConnector::new(cfg);
        let handle = NetEntity::from_arc(&entity);
        self.connectors.lock().push(entity);
        handle
    }

    /// Create a UDP entity; nothing binds until `start`.
    pub fn make_udp_entity(&self, cfg: UdpConfig) -> NetEntity<UdpEntity> {
        let entity = UdpEntity::new(cfg);
        let handle = NetEntity::from_arc(&entity);
        self.udp_entities.lock().push(entity);
        handle
    }

    /// Drop ownership of a stopped entity, expiring its handles.
    pub fn remove<E: HubEntity>(&self, handle: &NetEntity<E>) -> Result<()> {
        let mut collection = E::collection(self).lock();
        let idx = collection
            .iter()
            .position(|e| Arc::as_ptr(e) == handle.ptr())
            .ok_or(LongeronError::WeakReferenceExpired)?;
        if collection[idx].entity_is_started() {
            return Err(LongeronError::EntityAlreadyStarted);
        }
        collection.swap_remove(idx);
        Ok(())
    }

    /// Stop every started entity. Entities that were not running are
    /// skipped.
    pub fn stop_all(&self) {
        for e in self.acceptors.lock().iter() {
            let _ = e.entity_stop();
        }
        for e in self.connectors.lock().iter() {
            let _ = e.entity_stop();
        }
        for e in self.udp_entities.lock().iter() {
            let _ = e.entity_stop();
        }
    }
}
