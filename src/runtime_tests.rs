// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for the engine event mapping.

#[cfg(test)]
mod tests {
    use bollard::models::{EventActor, EventMessage, EventMessageTypeEnum};

    use super::super::{map_event, short_id, ContainerStatus};

    fn container_event(action: &str) -> EventMessage {
        EventMessage {
            typ: Some(EventMessageTypeEnum::CONTAINER),
            action: Some(action.to_string()),
            actor: Some(EventActor {
                id: Some("0123456789abcdef".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn lifecycle_actions_map_to_statuses() {
        let cases = [
            ("start", ContainerStatus::Start),
            ("unpause", ContainerStatus::Unpause),
            ("die", ContainerStatus::Die),
            ("pause", ContainerStatus::Pause),
        ];
        for (action, expected) in cases {
            let event = map_event(container_event(action)).unwrap();
            assert_eq!(event.status, expected);
            assert_eq!(event.id, "0123456789abcdef");
        }
    }

    #[test]
    fn uninteresting_actions_are_dropped() {
        for action in ["create", "destroy", "exec_create: /bin/sh", "attach"] {
            assert!(map_event(container_event(action)).is_none());
        }
    }

    #[test]
    fn non_container_events_are_dropped() {
        let mut event = container_event("start");
        event.typ = Some(EventMessageTypeEnum::NETWORK);
        assert!(map_event(event).is_none());

        let mut event = container_event("start");
        event.typ = None;
        assert!(map_event(event).is_none());
    }

    #[test]
    fn events_without_an_actor_id_are_dropped() {
        let mut event = container_event("start");
        event.actor = None;
        assert!(map_event(event).is_none());
    }

    #[test]
    fn up_down_classification() {
        assert!(ContainerStatus::Start.is_up());
        assert!(ContainerStatus::Unpause.is_up());
        assert!(!ContainerStatus::Die.is_up());
        assert!(!ContainerStatus::Pause.is_up());
    }

    #[test]
    fn short_id_truncates_long_ids_only() {
        assert_eq!(short_id("0123456789abcdef0123"), "0123456789ab");
        assert_eq!(short_id("abc"), "abc");
    }
}
