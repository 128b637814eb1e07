//! Publishing, subscriptions and auto-publish bindings

use super::errors::{ManagerError, ManagerResult};
use super::manager::Manager;
use crate::core_host::{CallSite, Diagnostic, Host, Severity, Val};
use crate::core_transport::{NodeId, Transport};
use crate::core_wire::{
    val_to_data, CodecResult, Data, Event, IdentifierUpdate, LogCreate, LogField, LogWrite,
    Message, Topic, WriterInfo,
};
use tracing::{debug, trace, warn};

/// An event ready to publish. Validation failures leave `name` unset; such
/// a record must not be published.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventRecord {
    pub name: Option<String>,
    pub args: Vec<Data>,
}

impl EventRecord {
    pub fn is_valid(&self) -> bool {
        self.name.is_some()
    }
}

impl<T: Transport, H: Host> Manager<T, H> {
    fn ensure_running(&self) -> ManagerResult<()> {
        if self.transport.is_shutdown() {
            return Err(ManagerError::Shutdown);
        }
        Ok(())
    }

    pub fn publish_event(&mut self, topic: &str, name: &str, args: Vec<Data>) -> ManagerResult<()> {
        self.ensure_running()?;
        let message = Message::Event(Event {
            name: name.to_string(),
            args,
        });
        trace!(topic, event = name, "publishing event");
        self.transport.publish(&Topic::new(topic), message.into_data())?;
        self.stats.inc_events_outgoing();
        Ok(())
    }

    pub fn publish_event_record(&mut self, topic: &str, record: &EventRecord) -> ManagerResult<()> {
        let name = record.name.as_deref().ok_or(ManagerError::UnnamedEvent)?;
        self.publish_event(topic, name, record.args.clone())
    }

    /// Publish the current value of a host identifier
    pub fn publish_identifier(&mut self, topic: &str, name: &str) -> ManagerResult<()> {
        self.ensure_running()?;
        let identifier = self
            .host
            .lookup_identifier(name)
            .ok_or_else(|| ManagerError::UnknownIdentifier(name.to_string()))?;
        let value = identifier
            .value
            .ok_or_else(|| ManagerError::UnsetIdentifier(name.to_string()))?;
        let value = val_to_data(&value).map_err(|e| {
            warn!(identifier = name, error = %e, "cannot publish identifier");
            e
        })?;

        let message = Message::IdentifierUpdate(IdentifierUpdate {
            name: name.to_string(),
            value,
        });
        self.transport.publish(&Topic::new(topic), message.into_data())?;
        self.stats.inc_ids_outgoing();
        Ok(())
    }

    /// Announce a log stream's writer and schema, to everyone or to one peer
    pub fn publish_log_create(
        &mut self,
        stream: &str,
        writer: &str,
        info: WriterInfo,
        fields: Vec<LogField>,
        peer: Option<&NodeId>,
    ) -> ManagerResult<()> {
        self.ensure_running()?;
        let topic = self.log_topic(stream, &info.path);
        let message = Message::LogCreate(LogCreate {
            stream: stream.to_string(),
            writer: writer.to_string(),
            info,
            fields,
        });
        match peer {
            Some(node) => self.transport.publish_to(node, &topic, message.into_data())?,
            None => self.transport.publish(&topic, message.into_data())?,
        }
        debug!(stream, writer, %topic, "published log create");
        Ok(())
    }

    /// Queue a log row for the next flush. `None` values are unset fields.
    pub fn publish_log_write(
        &mut self,
        stream: &str,
        writer: &str,
        path: &str,
        values: &[Option<Val>],
    ) -> ManagerResult<()> {
        self.ensure_running()?;
        let values = values
            .iter()
            .map(|v| v.as_ref().map_or(Ok(Data::None), val_to_data))
            .collect::<CodecResult<Vec<_>>>()
            .map_err(|e| {
                warn!(stream, path, error = %e, "cannot serialize log write");
                e
            })?;

        let topic = self.log_topic(stream, path);
        let message = Message::LogWrite(LogWrite {
            stream: stream.to_string(),
            writer: writer.to_string(),
            path: path.to_string(),
            values,
        });
        if let Err(e) = self.log_buffers.push(stream, topic, message.into_data()) {
            self.stats.inc_logs_dropped();
            debug!(stream, error = %e, "dropping log write");
            return Err(e.into());
        }
        Ok(())
    }

    /// Send one batch per stream and topic. Returns the number of records
    /// sent.
    pub fn flush_log_buffers(&mut self) -> usize {
        if self.transport.is_shutdown() || self.log_buffers.is_empty() {
            return 0;
        }
        let transport = &mut self.transport;
        match self
            .log_buffers
            .flush(|topic, batch| transport.publish(topic, batch))
        {
            Ok(sent) => {
                self.stats.add_logs_outgoing(sent as u64);
                sent
            }
            Err(e) => {
                warn!(sent = e.sent, error = %e.error, "log flush interrupted");
                self.stats.add_logs_outgoing(e.sent as u64);
                e.sent
            }
        }
    }

    /// Records waiting for a flush
    pub fn buffered_log_writes(&self) -> usize {
        self.log_buffers.pending()
    }

    pub fn set_log_topic_fn(&mut self, f: impl Fn(&str, &str) -> String + 'static) {
        self.log_topic_fn = Some(Box::new(f));
    }

    pub fn log_topic(&self, stream: &str, path: &str) -> Topic {
        match &self.log_topic_fn {
            Some(f) => Topic::new(f(stream, path)),
            None => Topic::new(format!("{}{}", self.config.log_buffer.topic_prefix, stream)),
        }
    }

    /// Mirror every local dispatch of `event` on `topic`. Returns false if
    /// the host does not know the event.
    pub fn auto_publish_event(&mut self, topic: &str, event: &str) -> bool {
        if self.host.lookup_event(event).is_none() {
            warn!(event, "cannot auto-publish unknown event");
            return false;
        }
        if self
            .auto_publish
            .entry(event.to_string())
            .or_default()
            .insert(topic.to_string())
        {
            debug!(topic, event, "auto-publishing event");
        }
        true
    }

    pub fn auto_unpublish_event(&mut self, topic: &str, event: &str) -> bool {
        let Some(topics) = self.auto_publish.get_mut(event) else {
            return false;
        };
        let removed = topics.remove(topic);
        if topics.is_empty() {
            self.auto_publish.remove(event);
        }
        removed
    }

    /// Called by the host whenever it dispatches an event locally. Returns
    /// the number of topics it was mirrored on.
    pub fn on_local_event(&mut self, event: &str, args: &[Val]) -> usize {
        if !self.after_init || self.transport.is_shutdown() {
            return 0;
        }
        let Some(topics) = self.auto_publish.get(event) else {
            return 0;
        };
        let topics: Vec<String> = topics.iter().cloned().collect();

        let data = match args.iter().map(val_to_data).collect::<CodecResult<Vec<_>>>() {
            Ok(data) => data,
            Err(e) => {
                warn!(event, error = %e, "cannot auto-publish event");
                return 0;
            }
        };

        let mut published = 0;
        for topic in topics {
            match self.publish_event(&topic, event, data.clone()) {
                Ok(()) => published += 1,
                Err(e) => warn!(event, %topic, error = %e, "auto-publish failed"),
            }
        }
        published
    }

    /// Build an event record from host values. The first value names the
    /// event and the rest must match its parameters. On failure a
    /// diagnostic is reported at `call_site` and the record is unnamed.
    pub fn make_event(&mut self, args: Vec<Val>, call_site: Option<&CallSite>) -> EventRecord {
        match self.build_event(args) {
            Ok(record) => record,
            Err(message) => {
                self.error(call_site, message);
                EventRecord::default()
            }
        }
    }

    fn build_event(&self, args: Vec<Val>) -> Result<EventRecord, String> {
        let mut args = args.into_iter();
        let name = match args.next() {
            Some(Val::Event(name)) => name,
            Some(other) => {
                return Err(format!(
                    "attempt to convert non-event into an event type: {}",
                    other.type_name()
                ))
            }
            None => return Err("no event arguments given".to_string()),
        };
        let signature = self
            .host
            .lookup_event(&name)
            .ok_or_else(|| format!("unknown event: {}", name))?;

        let args: Vec<Val> = args.collect();
        if args.len() != signature.params.len() {
            return Err(format!(
                "bad # of arguments for {}: got {}, expect {}",
                name,
                args.len(),
                signature.params.len()
            ));
        }

        let mut data = Vec::with_capacity(args.len());
        for (i, (arg, ty)) in args.iter().zip(&signature.params).enumerate() {
            if !arg.conforms_to(ty) {
                return Err(format!(
                    "bad type of argument {} for {}: got {}, expect {}",
                    i + 1,
                    name,
                    arg.type_name(),
                    ty
                ));
            }
            let value = val_to_data(arg)
                .map_err(|e| format!("unsupported argument {} for {}: {}", i + 1, name, e))?;
            data.push(value);
        }

        Ok(EventRecord {
            name: Some(name),
            args: data,
        })
    }

    /// Report an error to the host, attributed to `call_site` when known
    pub fn error(&mut self, call_site: Option<&CallSite>, message: impl Into<String>) {
        let diagnostic = Diagnostic {
            severity: Severity::Error,
            call_site: call_site.cloned(),
            message: message.into(),
        };
        debug!(%diagnostic, "reporting diagnostic");
        self.host.report(diagnostic);
    }

    /// Register a local-delivery prefix. False if already registered or if
    /// the prefix names a store topic.
    pub fn subscribe(&mut self, prefix: &str) -> bool {
        if reserved_for_stores(prefix) || self.subscriptions.contains(prefix) {
            return false;
        }
        if let Err(e) = self.transport.subscribe(prefix) {
            warn!(prefix, error = %e, "subscribe failed");
            return false;
        }
        self.subscriptions.insert(prefix.to_string());
        debug!(prefix, "subscribed");
        true
    }

    /// Register a relay-only prefix. False if already registered or if the
    /// prefix names a store topic.
    pub fn forward(&mut self, prefix: &str) -> bool {
        if reserved_for_stores(prefix) || self.forwards.contains(prefix) {
            return false;
        }
        if let Err(e) = self.transport.forward(prefix) {
            warn!(prefix, error = %e, "forward failed");
            return false;
        }
        self.forwards.insert(prefix.to_string());
        debug!(prefix, "forwarding");
        true
    }

    /// Remove both registrations of `prefix`. False if neither existed.
    pub fn unsubscribe(&mut self, prefix: &str) -> bool {
        if reserved_for_stores(prefix) {
            return false;
        }
        let local = self.subscriptions.remove(prefix);
        let relay = self.forwards.remove(prefix);
        if !local && !relay {
            return false;
        }
        if let Err(e) = self.transport.unsubscribe(prefix) {
            warn!(prefix, error = %e, "unsubscribe failed");
        }
        debug!(prefix, "unsubscribed");
        true
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = &str> {
        self.subscriptions.iter().map(String::as_str)
    }

    pub fn forwards(&self) -> impl Iterator<Item = &str> {
        self.forwards.iter().map(String::as_str)
    }
}

/// Store topics belong to the store registry
fn reserved_for_stores(prefix: &str) -> bool {
    if Topic::new(prefix).store_topic().is_some() {
        warn!(prefix, "prefix is reserved for data stores");
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_host::Type;
    use crate::core_transport::MeshNetwork;
    use crate::test_utils::simulated_manager;

    #[test]
    fn test_subscribe_is_idempotent() {
        let network = MeshNetwork::new();
        let mut mgr = simulated_manager(&network);
        assert!(mgr.subscribe("a/"));
        assert!(!mgr.subscribe("a/"));
        assert!(mgr.forward("a/"));
        assert!(mgr.unsubscribe("a/"));
        assert!(!mgr.unsubscribe("a/"));
        assert_eq!(mgr.subscriptions().count(), 0);
        assert_eq!(mgr.forwards().count(), 0);
    }

    #[test]
    fn test_store_topics_are_reserved() {
        let network = MeshNetwork::new();
        let mut mgr = simulated_manager(&network);
        assert!(!mgr.subscribe("kv/data/master"));
        assert!(!mgr.forward("kv/data/clone"));
        assert!(!mgr.unsubscribe("kv/data/master"));
        assert!(mgr.subscribe("kv/data/"));
        assert_eq!(mgr.subscriptions().collect::<Vec<_>>(), vec!["kv/data/"]);
        assert_eq!(mgr.forwards().count(), 0);
    }

    #[test]
    fn test_make_event_validates_arguments() {
        let network = MeshNetwork::new();
        let mut mgr = simulated_manager(&network);
        mgr.host_mut()
            .define_event("ping", vec![Type::String, Type::Count]);
        let site = CallSite::new("ping.script", 12);

        let ok = mgr.make_event(
            vec![Val::Event("ping".into()), Val::from("hi"), Val::Count(1)],
            Some(&site),
        );
        assert_eq!(ok.name.as_deref(), Some("ping"));
        assert_eq!(ok.args, vec![Data::from("hi"), Data::Count(1)]);

        let bad = mgr.make_event(vec![Val::Event("ping".into()), Val::Count(1)], Some(&site));
        assert!(!bad.is_valid());
        let bad = mgr.make_event(
            vec![Val::Event("ping".into()), Val::Count(1), Val::Count(1)],
            Some(&site),
        );
        assert!(!bad.is_valid());
        let bad = mgr.make_event(vec![Val::from("ping")], None);
        assert!(!bad.is_valid());

        let diagnostics = mgr.host().diagnostics();
        assert_eq!(diagnostics.len(), 3);
        assert_eq!(diagnostics[0].call_site.as_ref(), Some(&site));
        assert!(diagnostics[1].message.contains("bad type of argument 1"));
        assert!(diagnostics[2].call_site.is_none());

        assert!(matches!(
            mgr.publish_event_record("t", &bad),
            Err(ManagerError::UnnamedEvent)
        ));
    }

    #[test]
    fn test_make_event_rejects_unrepresentable_values() {
        let network = MeshNetwork::new();
        let mut mgr = simulated_manager(&network);
        mgr.host_mut().define_event("cb", vec![Type::Func]);
        let record = mgr.make_event(vec![Val::Event("cb".into()), Val::Func("f".into())], None);
        assert!(!record.is_valid());
    }

    #[test]
    fn test_publish_identifier_errors() {
        let network = MeshNetwork::new();
        let mut mgr = simulated_manager(&network);
        mgr.host_mut().define_identifier("unset", Type::Count, None);
        mgr.host_mut()
            .define_identifier("func", Type::Func, Some(Val::Func("f".into())));

        assert!(matches!(
            mgr.publish_identifier("t", "missing"),
            Err(ManagerError::UnknownIdentifier(_))
        ));
        assert!(matches!(
            mgr.publish_identifier("t", "unset"),
            Err(ManagerError::UnsetIdentifier(_))
        ));
        assert!(matches!(
            mgr.publish_identifier("t", "func"),
            Err(ManagerError::Codec(_))
        ));
        assert_eq!(mgr.stats().num_ids_outgoing, 0);
    }

    #[test]
    fn test_auto_publish_bindings() {
        let network = MeshNetwork::new();
        let mut mgr = simulated_manager(&network);
        mgr.host_mut().define_event("tick", vec![]);

        assert!(!mgr.auto_publish_event("t", "unknown"));
        assert!(mgr.auto_publish_event("t", "tick"));
        assert!(mgr.auto_publish_event("t", "tick"));

        // Bindings only fire after init_done
        assert_eq!(mgr.on_local_event("tick", &[]), 0);
        mgr.init_done();
        assert_eq!(mgr.on_local_event("tick", &[]), 1);
        assert_eq!(mgr.stats().num_events_outgoing, 1);

        assert!(mgr.auto_unpublish_event("t", "tick"));
        assert!(!mgr.auto_unpublish_event("t", "tick"));
        assert_eq!(mgr.on_local_event("tick", &[]), 0);
    }

    #[test]
    fn test_log_topic_function() {
        let network = MeshNetwork::new();
        let mut mgr = simulated_manager(&network);
        assert_eq!(mgr.log_topic("Conn::LOG", "conn").as_str(), "peerbus/logs/Conn::LOG");

        mgr.set_log_topic_fn(|stream, path| format!("logs/{}/{}", path, stream));
        assert_eq!(mgr.log_topic("Conn::LOG", "conn").as_str(), "logs/conn/Conn::LOG");
    }

    #[test]
    fn test_log_write_optional_fields() {
        let network = MeshNetwork::new();
        let mut mgr = simulated_manager(&network);
        mgr.publish_log_write("Conn::LOG", "ASCII", "conn", &[Some(Val::from("C1")), None])
            .unwrap();
        assert_eq!(mgr.buffered_log_writes(), 1);

        let err = mgr
            .publish_log_write("Conn::LOG", "ASCII", "conn", &[Some(Val::Func("f".into()))])
            .unwrap_err();
        assert!(matches!(err, ManagerError::Codec(_)));
        assert_eq!(mgr.buffered_log_writes(), 1);
    }
}
