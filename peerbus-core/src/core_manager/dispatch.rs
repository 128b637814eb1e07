//! Inbound message routing
//!
//! Store topics go straight to the store registry. Everything else is
//! decoded once into a [`Message`] and handled per variant, but only when a
//! local-delivery subscription matches the topic: messages that arrive
//! through a forward-only registration have already been relayed by the
//! transport and are not delivered here.

use super::manager::Manager;
use crate::core_host::Host;
use crate::core_transport::Transport;
use crate::core_wire::{
    data_to_val, Data, Event, IdentifierUpdate, LogCreate, LogWrite, Message, Topic,
};
use tracing::{debug, trace, warn};

impl<T: Transport, H: Host> Manager<T, H> {
    pub fn dispatch_message(&mut self, topic: &Topic, data: Data) {
        if let Some(store_topic) = topic.store_topic() {
            let now = self.now();
            self.stores
                .handle_message(store_topic, data, &mut self.transport, now);
            return;
        }

        if !self.subscriptions.iter().any(|prefix| topic.matches(prefix)) {
            trace!(%topic, "no local subscription, not delivering");
            return;
        }

        match Message::from_data(data) {
            Ok(message) => self.dispatch(topic, message),
            Err(e) => debug!(%topic, error = %e, "dropping undecodable message"),
        }
    }

    fn dispatch(&mut self, topic: &Topic, message: Message) {
        match message {
            Message::Event(event) => self.process_event(topic, event),
            Message::LogCreate(create) => self.process_log_create(create),
            Message::LogWrite(write) => self.process_log_write(write),
            Message::IdentifierUpdate(update) => self.process_identifier_update(update),
            Message::Batch(messages) => {
                for message in messages {
                    self.dispatch(topic, message);
                }
            }
        }
    }

    fn process_event(&mut self, topic: &Topic, event: Event) {
        let Some(signature) = self.host.lookup_event(&event.name) else {
            debug!(%topic, event = %event.name, "dropping unknown remote event");
            return;
        };
        if signature.params.len() != event.args.len() {
            warn!(
                event = %event.name,
                got = event.args.len(),
                expected = signature.params.len(),
                "remote event has wrong number of arguments"
            );
            return;
        }

        let mut args = Vec::with_capacity(event.args.len());
        for (i, (data, ty)) in event.args.iter().zip(&signature.params).enumerate() {
            match data_to_val(data, ty) {
                Ok(val) => args.push(val),
                Err(e) => {
                    warn!(event = %event.name, arg = i + 1, error = %e, "cannot convert remote event argument");
                    return;
                }
            }
        }

        self.stats.inc_events_incoming();
        self.host.raise_event(&event.name, args);
    }

    fn process_log_create(&mut self, create: LogCreate) {
        if !self.host.create_log_writer(&create) {
            warn!(stream = %create.stream, writer = %create.writer, "failed to create remote log writer");
        }
    }

    fn process_log_write(&mut self, write: LogWrite) {
        self.stats.inc_logs_incoming();
        if !self.host.write_log(&write) {
            debug!(stream = %write.stream, path = %write.path, "remote log write not accepted");
        }
    }

    fn process_identifier_update(&mut self, update: IdentifierUpdate) {
        self.stats.inc_ids_incoming();
        let Some(identifier) = self.host.lookup_identifier(&update.name) else {
            warn!(identifier = %update.name, "update for unknown identifier");
            return;
        };
        match data_to_val(&update.value, &identifier.ty) {
            Ok(value) => self.host.update_identifier(&update.name, value),
            Err(e) => warn!(identifier = %update.name, error = %e, "cannot convert identifier update"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_host::{Type, Val};
    use crate::core_transport::MeshNetwork;
    use crate::core_wire::batch_data;
    use crate::test_utils::simulated_manager;

    fn event(name: &str, args: Vec<Data>) -> Data {
        Message::Event(Event {
            name: name.to_string(),
            args,
        })
        .into_data()
    }

    #[test]
    fn test_event_needs_local_subscription() {
        let network = MeshNetwork::new();
        let mut mgr = simulated_manager(&network);
        mgr.host_mut().define_event("ping", vec![Type::Count]);
        mgr.forward("relay/");
        mgr.subscribe("local/");

        mgr.dispatch_message(&Topic::new("relay/x"), event("ping", vec![Data::Count(1)]));
        assert!(mgr.host().raised("ping").is_empty());

        mgr.dispatch_message(&Topic::new("local/x"), event("ping", vec![Data::Count(2)]));
        assert_eq!(mgr.host().raised("ping"), vec![vec![Val::Count(2)]]);
        assert_eq!(mgr.stats().num_events_incoming, 1);
    }

    #[test]
    fn test_event_argument_checks() {
        let network = MeshNetwork::new();
        let mut mgr = simulated_manager(&network);
        mgr.host_mut().define_event("ping", vec![Type::Count]);
        mgr.subscribe("");

        let topic = Topic::new("t");
        mgr.dispatch_message(&topic, event("ping", vec![]));
        mgr.dispatch_message(&topic, event("ping", vec![Data::from("x")]));
        mgr.dispatch_message(&topic, event("unknown", vec![]));
        mgr.dispatch_message(&topic, Data::Count(3));
        assert!(mgr.host().raised("ping").is_empty());
        assert_eq!(mgr.stats().num_events_incoming, 0);
    }

    #[test]
    fn test_batch_is_unpacked() {
        let network = MeshNetwork::new();
        let mut mgr = simulated_manager(&network);
        mgr.subscribe("logs/");
        let write = |i: u64| {
            Message::LogWrite(LogWrite {
                stream: "Conn::LOG".into(),
                writer: "ASCII".into(),
                path: "conn".into(),
                values: vec![Data::Count(i)],
            })
            .into_data()
        };

        mgr.dispatch_message(&Topic::new("logs/conn"), batch_data(vec![write(1), write(2)]));
        assert_eq!(mgr.host().log_writes().len(), 2);
        assert_eq!(mgr.stats().num_logs_incoming, 2);

        let mixed = batch_data(vec![Data::from("garbage"), write(3)]);
        mgr.dispatch_message(&Topic::new("logs/conn"), mixed);
        assert_eq!(mgr.host().log_writes().len(), 3);
        assert_eq!(mgr.host().log_writes()[2].values, vec![Data::Count(3)]);
    }

    #[test]
    fn test_identifier_update() {
        let network = MeshNetwork::new();
        let mut mgr = simulated_manager(&network);
        mgr.host_mut().define_identifier("threshold", Type::Count, None);
        mgr.subscribe("ids/");

        let update = |name: &str, value: Data| {
            Message::IdentifierUpdate(IdentifierUpdate {
                name: name.to_string(),
                value,
            })
            .into_data()
        };
        mgr.dispatch_message(&Topic::new("ids/x"), update("threshold", Data::Count(5)));
        mgr.dispatch_message(&Topic::new("ids/x"), update("threshold", Data::from("five")));
        mgr.dispatch_message(&Topic::new("ids/x"), update("missing", Data::Count(1)));

        assert_eq!(mgr.host().identifier("threshold"), Some(&Val::Count(5)));
        assert_eq!(mgr.stats().num_ids_incoming, 3);
    }
}
