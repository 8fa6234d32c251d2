use std::pin::Pin;

use futures::{Stream, StreamExt};
use k8s_openapi::api::networking::v1::Ingress;
use kube::{
    runtime::watcher::{self, Event},
    Api, ResourceExt,
};
use tokio::{sync::oneshot, time};
use tracing::{debug, info, warn};

use crate::reconcile::Trigger;

/// Wraps the Ingress watch stream and turns its events into reconcile
/// triggers.
pub(crate) struct IngressWatch(
    Pin<Box<dyn Stream<Item = watcher::Result<Event<Ingress>>> + Send + 'static>>,
);

impl<W> From<W> for IngressWatch
where
    W: Stream<Item = watcher::Result<Event<Ingress>>> + Send + 'static,
{
    fn from(watch: W) -> Self {
        IngressWatch(watch.boxed())
    }
}

impl IngressWatch {
    pub(crate) fn new(api: Api<Ingress>) -> Self {
        watcher::watcher(api, watcher::Config::default()).into()
    }

    /// Signals `synced` once the initial listing has been delivered, then
    /// fires `trigger` for every later add, update and delete.
    ///
    /// Returns only if the underlying stream ends.
    pub(crate) async fn run(mut self, trigger: Trigger, synced: oneshot::Sender<()>) {
        let mut synced = Some(synced);

        while let Some(event) = self.0.next().await {
            match event {
                Ok(Event::Init) => debug!("Ingress watch (re)listing"),
                Ok(Event::InitApply(ingress)) => {
                    debug!(ingress = %id(&ingress), "Ingress listed");
                }
                Ok(Event::InitDone) => match synced.take() {
                    Some(tx) => {
                        info!("Ingress cache synced");
                        // The receiver may already have given up waiting.
                        let _ = tx.send(());
                    }
                    None => {
                        debug!("Ingress watch relisted");
                        trigger.notify();
                    }
                },
                Ok(Event::Apply(ingress)) => {
                    debug!(ingress = %id(&ingress), "Ingress applied");
                    trigger.notify();
                }
                Ok(Event::Delete(ingress)) => {
                    debug!(ingress = %id(&ingress), "Ingress deleted");
                    trigger.notify();
                }
                Err(error) => {
                    warn!(%error, "Ingress watch disconnected");
                    time::sleep(time::Duration::from_secs(1)).await;
                }
            }
        }

        warn!("Ingress watch terminated");
    }
}

fn id(ingress: &Ingress) -> String {
    format!(
        "{}/{}",
        ingress.namespace().unwrap_or_default(),
        ingress.name_any()
    )
}
