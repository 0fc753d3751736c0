use std::time::{Duration, Instant};

use log::{debug, warn};
use parking_lot::Mutex;

use crate::endpoint::Endpoint;
use crate::error::{MulticallError, Result};

/// A connection handed out by [`EndpointPool::acquire`].
#[derive(Debug, Clone)]
pub struct EndpointHandle<C> {
    connection: C,
    label: String,
}

impl<C> EndpointHandle<C> {
    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn into_connection(self) -> C {
        self.connection
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

enum Selection<C> {
    Acquired(EndpointHandle<C>),
    Wait { delay: Duration, label: String },
}

/// Pool of rate limited endpoints.
///
/// [`acquire`](Self::acquire) hands out the first endpoint that is usable right
/// now. Selection and the last-use update happen under the same lock, so two
/// callers can never get the same endpoint inside one interval.
#[derive(Debug)]
pub struct EndpointPool<C> {
    endpoints: Mutex<Vec<Endpoint<C>>>,
}

impl<C: Clone> EndpointPool<C> {
    /// Unlabelled endpoints are named after their position, `endpoint-<n>`.
    pub fn new(endpoints: impl IntoIterator<Item = Endpoint<C>>) -> Self {
        let pool = Self {
            endpoints: Mutex::new(Vec::new()),
        };
        for endpoint in endpoints {
            pool.add(endpoint);
        }
        pool
    }

    pub fn add(&self, mut endpoint: Endpoint<C>) -> &Self {
        let mut endpoints = self.endpoints.lock();
        let position = endpoints.len();
        endpoint.set_default_label(|| format!("endpoint-{position}"));
        endpoints.push(endpoint);
        self
    }

    pub fn len(&self) -> usize {
        self.endpoints.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.lock().is_empty()
    }

    pub fn labels(&self) -> Vec<String> {
        self.endpoints
            .lock()
            .iter()
            .map(|endpoint| endpoint.label().unwrap_or_default().to_owned())
            .collect()
    }

    /// Returns an endpoint that can be used without hitting its rate limit.
    ///
    /// When every endpoint is cooling down, `block == false` returns `Ok(None)`
    /// while `block == true` sleeps until the soonest one opens and scans again.
    /// Fails only when the pool is empty.
    pub fn acquire(&self, block: bool) -> Result<Option<EndpointHandle<C>>> {
        loop {
            match self.select(Instant::now())? {
                Selection::Acquired(handle) => return Ok(Some(handle)),
                Selection::Wait { .. } if !block => return Ok(None),
                Selection::Wait { delay, label } => {
                    warn!("all endpoints are rate limited, waiting {delay:?} for {label}");
                    std::thread::sleep(delay);
                }
            }
        }
    }

    fn select(&self, now: Instant) -> Result<Selection<C>> {
        let mut endpoints = self.endpoints.lock();
        let mut soonest: Option<(Duration, usize)> = None;

        for position in 0..endpoints.len() {
            let wait = endpoints[position].time_until_usable(now);
            if wait.is_zero() {
                let endpoint = &mut endpoints[position];
                endpoint.mark_used(now);
                debug!("using {endpoint}");
                return Ok(Selection::Acquired(EndpointHandle {
                    connection: endpoint.connection().clone(),
                    label: endpoint.label().unwrap_or_default().to_owned(),
                }));
            }
            if soonest.map_or(true, |(best, _)| wait < best) {
                soonest = Some((wait, position));
            }
        }

        let (delay, position) = soonest.ok_or(MulticallError::NoEndpointAvailable)?;
        Ok(Selection::Wait {
            delay,
            label: endpoints[position].to_string(),
        })
    }
}
