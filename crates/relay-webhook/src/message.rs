//! Chat message text for platform events

use once_cell::sync::Lazy;
use regex::{NoExpand, Regex};
use relay_core::InboundEvent;

use crate::dispatcher::EnrichedResource;

// Scheme and authority at the start of a URL
static URL_ORIGIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://[\w.\-]+(:\d+)?").expect("origin pattern is valid")
});

/// Point a platform web URL at the externally reachable server
pub fn rewrite_origin(webpage_url: &str, server: &str) -> String {
    URL_ORIGIN
        .replace(webpage_url, NoExpand(server.trim_end_matches('/')))
        .into_owned()
}

/// Text for a deleted resource, which can no longer be looked up
pub fn deletion_message(event: &InboundEvent) -> String {
    format!(
        "A {} was deleted from our Tableau Server! It was titled *{}*. But yeah, it's gone now.",
        event.resource_type.display_name(),
        event.resource_name
    )
}

/// Text for any other event, built from the looked-up resource
pub fn update_message(event: &InboundEvent, resource: &EnrichedResource) -> String {
    let kind = event.resource_type.display_name();
    let name = &event.resource_name;

    let mut text = if event.event_type.is_refresh_failure() {
        format!(
            "A refresh of the {} <{}|*{}*> failed on our Tableau Server! The owner is {}.",
            kind, resource.web_page_url, name, resource.owner_name
        )
    } else {
        format!(
            "A {} was published or updated on our Tableau Server! The owner is {} and it's titled <{}|*{}*>.",
            kind, resource.owner_name, resource.web_page_url, name
        )
    };

    if resource.preview_image.is_some() {
        text.push_str(" Here is what it looks like.");
    }

    text
}
