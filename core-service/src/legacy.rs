//! Old call shapes kept for hosts that have not moved to
//! [`CacheCoordinator`]. Every method delegates; no cache logic lives here.

use bridge_traits::content::Content;
use core_cache::ActionKind;

use crate::coordinator::{ActionReceipt, CacheCoordinator};
use crate::error::Result;

#[derive(Clone)]
pub struct LegacyCacheAdapter {
    coordinator: CacheCoordinator,
}

impl LegacyCacheAdapter {
    pub fn new(coordinator: CacheCoordinator) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &CacheCoordinator {
        &self.coordinator
    }

    /// Cached content, stale included, without network access.
    pub async fn get_cached_content(&self) -> Option<Content> {
        self.coordinator
            .peek_cached(true)
            .await
            .map(|entry| entry.content)
    }

    pub async fn fetch_today(&self) -> Option<Content> {
        self.coordinator
            .get_today_content(false)
            .await
            .map(|served| served.entry.content)
    }

    pub async fn force_refresh(&self) -> Option<Content> {
        self.coordinator
            .get_today_content(true)
            .await
            .map(|served| served.entry.content)
    }

    pub async fn clear_cache(&self) -> Result<()> {
        self.coordinator.invalidate_cache("legacy clear_cache").await?;
        Ok(())
    }

    pub async fn queue_pending_interaction(
        &self,
        content_id: &str,
        interaction: &str,
    ) -> ActionReceipt {
        self.coordinator
            .record_offline_action(ActionKind::UserInteractionSideEffect {
                content_id: content_id.to_string(),
                interaction: interaction.to_string(),
                occurred_at: self.coordinator.now(),
            })
            .await
    }

    pub async fn is_content_stale(&self) -> bool {
        self.coordinator.peek_cached(false).await.is_none()
    }
}
