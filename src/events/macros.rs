/// Emit a [`SystemEvent`](crate::events::model::SystemEvent) with a fresh correlation id.
///
/// `emit_system_event!("factory", LogLevel::Info, "factory_ready", Some(addr))`
///
/// The level is resolved at the call site, so callers import `LogLevel` themselves.
#[macro_export]
macro_rules! emit_system_event {
    ($component:expr, $level:expr, $action:expr, $detail:expr) => {{
        let mut meta = $crate::events::dispatcher::meta($component, $level);
        meta.corr_id = Some($crate::events::dispatcher::correlation_id());
        $crate::events::dispatcher::emit($crate::events::model::LogEvent::System(
            $crate::events::model::SystemEvent {
                meta,
                action: $action.to_string(),
                detail: $detail,
            },
        ));
    }};
}
