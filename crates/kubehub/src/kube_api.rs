use futures::{stream::BoxStream, StreamExt};
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    runtime::{
        watcher::{self, Event},
        WatchStreamExt,
    },
    Client, ResourceExt,
};
use tracing::debug;

use crate::{ApiError, Shard, ShardApi, ShardEvent};

/// `ShardApi` over a live cluster.
#[derive(Clone)]
pub struct KubeShardApi {
    client: Client,
}

impl KubeShardApi {
    pub fn new(client: Client) -> Self { Self { client } }

    fn api(&self, namespace: &str) -> Api<Shard> { Api::namespaced(self.client.clone(), namespace) }
}

#[async_trait::async_trait]
impl ShardApi for KubeShardApi {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Shard>, ApiError> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn create(&self, namespace: &str, shard: &Shard) -> Result<Shard, ApiError> {
        Ok(self.api(namespace).create(&PostParams::default(), shard).await?)
    }

    async fn update(&self, namespace: &str, shard: &Shard) -> Result<Shard, ApiError> {
        let name = shard.name_any();
        Ok(self.api(namespace).replace(&name, &PostParams::default(), shard).await?)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), ApiError> {
        self.api(namespace).delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn list(&self, namespace: &str, selector: &str) -> Result<Vec<Shard>, ApiError> {
        let lp = ListParams::default().labels(selector);
        Ok(self.api(namespace).list(&lp).await?.items)
    }

    fn watch(&self, namespace: &str, selector: &str) -> BoxStream<'static, Result<ShardEvent, ApiError>> {
        let cfg = watcher::Config::default().labels(selector);
        debug!(namespace, selector, "opening shard watch");
        watcher::watcher(self.api(namespace), cfg)
            .default_backoff()
            .map(|ev| match ev {
                Ok(Event::Applied(o)) => Ok(ShardEvent::Applied(o.name_any())),
                Ok(Event::Deleted(o)) => Ok(ShardEvent::Deleted(o.name_any())),
                Ok(Event::Restarted(list)) => Ok(ShardEvent::Restarted(list.len())),
                Err(e) => Err(ApiError::Unavailable(e.to_string())),
            })
            .boxed()
    }
}
