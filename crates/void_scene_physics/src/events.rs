//! Contact and trigger events produced by a simulation step

use crate::collider::{FilterData, ShapeId};
use rapier3d::prelude as rapier;
use std::collections::HashMap;

/// Contact data from a collision
#[derive(Debug, Clone, Copy)]
pub struct ContactPoint {
    /// Contact point on the first shape, world space
    pub point: [f32; 3],
    /// Contact normal (pointing from shape1 to shape2), world space
    pub normal: [f32; 3],
    /// Separation distance (negative when penetrating)
    pub separation: f32,
    /// Impulse applied at this contact
    pub impulse: f32,
}

/// Type of pair event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairEventType {
    /// Pair started touching / overlapping
    Started,
    /// Pair stopped touching / overlapping
    Stopped,
}

/// An event between two shapes
#[derive(Debug, Clone)]
pub struct PairEvent {
    /// First shape
    pub shape1: ShapeId,
    /// Second shape
    pub shape2: ShapeId,
    /// Event type
    pub event_type: PairEventType,
    /// Whether this is a trigger event
    pub is_trigger: bool,
    /// Contact points (empty for trigger or stopped events)
    pub contacts: Vec<ContactPoint>,
}

impl PairEvent {
    /// Check if this is a start event
    pub fn is_started(&self) -> bool {
        self.event_type == PairEventType::Started
    }

    /// Check if this is a stop event
    pub fn is_stopped(&self) -> bool {
        self.event_type == PairEventType::Stopped
    }

    /// Check whether the event involves `shape`
    pub fn involves(&self, shape: ShapeId) -> bool {
        self.shape1 == shape || self.shape2 == shape
    }

    /// Get total impulse from all contacts
    pub fn total_impulse(&self) -> f32 {
        self.contacts.iter().map(|c| c.impulse).sum()
    }
}

/// Events gathered from the last fetched step
#[derive(Default)]
pub(crate) struct EventCollector {
    pub(crate) events: Vec<PairEvent>,
    /// Colliders removed since the last drain. The backend reports their
    /// final stop on the next step, after the collider is gone.
    removed: HashMap<rapier::ColliderHandle, ShapeId>,
}

impl EventCollector {
    pub(crate) fn clear(&mut self) {
        self.events.clear();
    }

    /// Remember which shape a collider carried before it was removed
    pub(crate) fn collider_removed(&mut self, handle: rapier::ColliderHandle, shape: ShapeId) {
        self.removed.insert(handle, shape);
    }

    fn shape_of(
        &self,
        colliders: &rapier::ColliderSet,
        handle: rapier::ColliderHandle,
    ) -> Option<ShapeId> {
        colliders
            .get(handle)
            .map(|collider| FilterData::unpack(collider.user_data).shape)
            .or_else(|| self.removed.get(&handle).copied())
    }

    /// Convert drained backend events, resolving shapes through filter data
    pub(crate) fn collect(
        &mut self,
        receiver: &crossbeam_channel::Receiver<rapier::CollisionEvent>,
        colliders: &rapier::ColliderSet,
        narrow_phase: &rapier::NarrowPhase,
    ) {
        while let Ok(event) = receiver.try_recv() {
            let (h1, h2, started) = match event {
                rapier::CollisionEvent::Started(h1, h2, _) => (h1, h2, true),
                rapier::CollisionEvent::Stopped(h1, h2, _) => (h1, h2, false),
            };

            let (Some(shape1), Some(shape2)) =
                (self.shape_of(colliders, h1), self.shape_of(colliders, h2))
            else {
                log::debug!("Dropping event for unknown colliders {:?} / {:?}", h1, h2);
                continue;
            };

            let is_trigger = event.sensor();
            let contacts = if started && !is_trigger {
                contact_points(narrow_phase, colliders, h1, h2)
            } else {
                Vec::new()
            };

            self.events.push(PairEvent {
                shape1,
                shape2,
                event_type: if started {
                    PairEventType::Started
                } else {
                    PairEventType::Stopped
                },
                is_trigger,
                contacts,
            });
        }
        self.removed.clear();
    }

    pub(crate) fn started(&self) -> impl Iterator<Item = &PairEvent> {
        self.events.iter().filter(|e| e.is_started() && !e.is_trigger)
    }

    pub(crate) fn trigger_enters(&self) -> impl Iterator<Item = &PairEvent> {
        self.events.iter().filter(|e| e.is_trigger && e.is_started())
    }

    pub(crate) fn trigger_exits(&self) -> impl Iterator<Item = &PairEvent> {
        self.events.iter().filter(|e| e.is_trigger && e.is_stopped())
    }
}

fn contact_points(
    narrow_phase: &rapier::NarrowPhase,
    colliders: &rapier::ColliderSet,
    h1: rapier::ColliderHandle,
    h2: rapier::ColliderHandle,
) -> Vec<ContactPoint> {
    let mut contacts = Vec::new();
    let Some(pair) = narrow_phase.contact_pair(h1, h2) else {
        return contacts;
    };
    let Some(c1) = colliders.get(pair.collider1) else {
        return contacts;
    };
    let pose = c1.position();

    for manifold in &pair.manifolds {
        let normal = pose * manifold.local_n1;
        for point in &manifold.points {
            let world = pose * point.local_p1;
            contacts.push(ContactPoint {
                point: [world.x, world.y, world.z],
                normal: [normal.x, normal.y, normal.z],
                separation: point.dist,
                impulse: point.data.impulse,
            });
        }
    }
    contacts
}

/// Channel-based event sink handed to the backend
pub(crate) struct ChannelEventSink {
    pub(crate) collision_events: crossbeam_channel::Sender<rapier::CollisionEvent>,
}

impl rapier::EventHandler for ChannelEventSink {
    fn handle_collision_event(
        &self,
        _bodies: &rapier::RigidBodySet,
        _colliders: &rapier::ColliderSet,
        event: rapier::CollisionEvent,
        _contact_pair: Option<&rapier::ContactPair>,
    ) {
        let _ = self.collision_events.send(event);
    }

    fn handle_contact_force_event(
        &self,
        _dt: f32,
        _bodies: &rapier::RigidBodySet,
        _colliders: &rapier::ColliderSet,
        _contact_pair: &rapier::ContactPair,
        _total_force_magnitude: f32,
    ) {
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_helpers() {
        let event = PairEvent {
            shape1: ShapeId(1),
            shape2: ShapeId(2),
            event_type: PairEventType::Started,
            is_trigger: false,
            contacts: vec![
                ContactPoint {
                    point: [0.0; 3],
                    normal: [0.0, 1.0, 0.0],
                    separation: 0.0,
                    impulse: 1.5,
                },
                ContactPoint {
                    point: [1.0; 3],
                    normal: [0.0, 1.0, 0.0],
                    separation: -0.01,
                    impulse: 0.5,
                },
            ],
        };
        assert!(event.is_started());
        assert!(event.involves(ShapeId(2)));
        assert!(!event.involves(ShapeId(3)));
        assert!((event.total_impulse() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_removed_collider_still_resolves_once() {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let mut colliders = rapier::ColliderSet::new();
        let live = colliders.insert(
            rapier::ColliderBuilder::ball(1.0)
                .user_data(
                    FilterData {
                        shape: ShapeId(7),
                        group: Default::default(),
                        flags: 0,
                    }
                    .pack(),
                )
                .build(),
        );
        let gone = rapier::ColliderHandle::from_raw_parts(40, 0);
        let narrow_phase = rapier::NarrowPhase::new();

        let mut collector = EventCollector::default();
        collector.collider_removed(gone, ShapeId(9));
        let flags = rapier::CollisionEventFlags::REMOVED | rapier::CollisionEventFlags::SENSOR;
        sender
            .send(rapier::CollisionEvent::Stopped(live, gone, flags))
            .unwrap();
        collector.collect(&receiver, &colliders, &narrow_phase);

        let exits: Vec<_> = collector.trigger_exits().collect();
        assert_eq!(exits.len(), 1);
        assert_eq!((exits[0].shape1, exits[0].shape2), (ShapeId(7), ShapeId(9)));

        // The mapping lives for one drain only
        collector.clear();
        sender
            .send(rapier::CollisionEvent::Stopped(live, gone, flags))
            .unwrap();
        collector.collect(&receiver, &colliders, &narrow_phase);
        assert_eq!(collector.events.len(), 0);
    }
}
