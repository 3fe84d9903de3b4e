use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use url::Url;

use crate::assembler::{Branch, EntityKey};
use crate::error::CrawlError;

/// A page body as delivered by a transport.
#[derive(Debug, Clone)]
pub struct Fetched {
    /// Final URL after redirects; relative links resolve against it.
    pub url: Url,
    pub body: String,
}

/// Moves bytes over the network. Retries, throttling and timeouts live behind it.
pub trait Transport: Send + Sync + 'static {
    fn fetch(&self, url: Url) -> impl Future<Output = Result<Fetched, CrawlError>> + Send;
}

/// Which handler processes a fetched page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Stage {
    /// Catalog root: first listing page plus pagination.
    #[default]
    Catalog,
    Listing,
    ModPage,
    License,
    /// First files page of a mod, which carries its own pagination.
    FilesIndex,
    FilesPage,
    FileDetails,
}

/// Opaque state travelling with a fetch and handed back with its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuation {
    /// Nothing to resume.
    Fresh,
    /// Resume assembly of an entity through one of its branches.
    Entity { key: EntityKey, branch: Branch },
    /// Files listing of a mod; rows back-reference the mod by name.
    Files { mod_name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: Url,
    pub stage: Stage,
    pub context: Continuation,
}

impl FetchRequest {
    pub fn new(url: Url, stage: Stage) -> Self {
        Self {
            url,
            stage,
            context: Continuation::Fresh,
        }
    }

    pub fn with_context(mut self, context: Continuation) -> Self {
        self.context = context;
        self
    }
}

/// A response (or transport failure) paired with the request that caused it.
#[derive(Debug)]
pub struct Delivery {
    pub request: FetchRequest,
    pub result: Result<Fetched, CrawlError>,
}

/// Hands requests to the transport and yields their deliveries as they complete.
///
/// Each request, and so each continuation, is moved into exactly one in-flight
/// fetch and comes back in exactly one [`Delivery`].
pub struct FetchDispatcher<T: Transport> {
    transport: Arc<T>,
    max_in_flight: usize,
    queued: VecDeque<FetchRequest>,
    in_flight: FuturesUnordered<BoxFuture<'static, Delivery>>,
    accepted: usize,
}

impl<T: Transport> FetchDispatcher<T> {
    pub fn new(transport: T, max_in_flight: usize) -> Self {
        Self {
            transport: Arc::new(transport),
            max_in_flight: max_in_flight.max(1),
            queued: VecDeque::new(),
            in_flight: FuturesUnordered::new(),
            accepted: 0,
        }
    }

    pub fn dispatch(&mut self, request: FetchRequest) {
        log::debug!("Queue {:?} {}", request.stage, request.url);
        self.accepted += 1;
        self.queued.push_back(request);
        self.fill();
    }

    /// The next delivery in completion order, or `None` once nothing is outstanding.
    pub async fn next_delivery(&mut self) -> Option<Delivery> {
        self.fill();
        let delivery = self.in_flight.next().await;
        self.fill();
        delivery
    }

    /// Requests accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted
    }

    /// Requests queued or in flight.
    pub fn outstanding(&self) -> usize {
        self.queued.len() + self.in_flight.len()
    }

    /// Drop every queued and in-flight request, returning how many were dropped.
    pub fn cancel(&mut self) -> usize {
        let dropped = self.outstanding();
        self.queued.clear();
        self.in_flight = FuturesUnordered::new();
        dropped
    }

    fn fill(&mut self) {
        while self.in_flight.len() < self.max_in_flight {
            let Some(request) = self.queued.pop_front() else {
                break;
            };
            let transport = Arc::clone(&self.transport);
            self.in_flight.push(Box::pin(async move {
                let result = transport.fetch(request.url.clone()).await;
                Delivery { request, result }
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::StaticTransport;
    use std::collections::HashSet;

    fn url(path: &str) -> Url {
        Url::parse("http://foo.org").unwrap().join(path).unwrap()
    }

    #[tokio::test]
    async fn test_every_context_delivered_exactly_once() {
        let mut transport = StaticTransport::new();
        for n in 0..4 {
            transport.insert(url(&format!("/files/{}", n)).as_str(), "<html></html>");
        }
        let mut dispatcher = FetchDispatcher::new(transport, 2);

        for n in 0..5 {
            let request = FetchRequest::new(url(&format!("/files/{}", n)), Stage::FilesPage)
                .with_context(Continuation::Files {
                    mod_name: format!("mod-{}", n),
                });
            dispatcher.dispatch(request);
        }
        assert_eq!(dispatcher.outstanding(), 5);

        let mut seen = HashSet::new();
        let mut failures = 0;
        while let Some(delivery) = dispatcher.next_delivery().await {
            let Continuation::Files { mod_name } = delivery.request.context else {
                panic!("context changed in flight");
            };
            assert!(seen.insert(mod_name), "context delivered twice");
            if delivery.result.is_err() {
                failures += 1;
            }
        }

        assert_eq!(seen.len(), 5);
        assert_eq!(failures, 1);
        assert_eq!(dispatcher.accepted(), 5);
        assert_eq!(dispatcher.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_cancel_drops_outstanding_requests() {
        let mut dispatcher = FetchDispatcher::new(StaticTransport::new(), 1);
        dispatcher.dispatch(FetchRequest::new(url("/a"), Stage::Listing));
        dispatcher.dispatch(FetchRequest::new(url("/b"), Stage::Listing));

        assert_eq!(dispatcher.cancel(), 2);
        assert!(dispatcher.next_delivery().await.is_none());
    }
}
