//! Contact resolution pipeline: name → contact page → channel.
//!
//! Per organization the pipeline moves through
//! `pending → searching → extracting → {success | failed | manual}`.
//! Only the terminal state is persisted, together with the attempt record
//! for the stage that decided it, in one transaction.
//!
//! Organizations are processed one at a time in name order. A stage error
//! is recorded against that organization and the pass moves on; nothing an
//! individual organization does can abort the batch.

use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{error, info, instrument, warn};

use optout_shared::{
    AttemptType, ContactPageMatch, Extractor, NewAttempt, OptoutError, OrgStatus, Organization,
    Outcome, Result, SearchProvider, WebsiteMatch, origin_of,
};
use optout_storage::Storage;

use crate::selector::{self, ChannelSelection};

// ---------------------------------------------------------------------------
// Progress + summary
// ---------------------------------------------------------------------------

/// How one organization ended up in a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Success,
    Failed,
    Manual,
}

/// Counts for one pass over the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub manual: usize,
    pub elapsed: Duration,
}

impl PassSummary {
    fn count(&mut self, resolution: Resolution) {
        self.processed += 1;
        match resolution {
            Resolution::Success => self.succeeded += 1,
            Resolution::Failed => self.failed += 1,
            Resolution::Manual => self.manual += 1,
        }
    }
}

/// Progress callback for reporting pass status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called before an organization is processed.
    fn org_started(&self, name: &str, current: usize, total: usize);
    /// Called after an organization is processed.
    fn org_finished(&self, name: &str, resolution: Resolution);
    /// Called when the pass completes.
    fn done(&self, summary: &PassSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn org_started(&self, _name: &str, _current: usize, _total: usize) {}
    fn org_finished(&self, _name: &str, _resolution: Resolution) {}
    fn done(&self, _summary: &PassSummary) {}
}

// ---------------------------------------------------------------------------
// Stage results
// ---------------------------------------------------------------------------

/// Stage A: contact page search.
enum SearchStage {
    Found(ContactPageMatch),
    /// No usable result, or the search itself failed.
    Failed(String),
}

/// Stage B: page extraction plus channel selection.
enum ExtractStage {
    Selected(ChannelSelection),
    Error(String),
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Resolution pipeline over borrowed collaborators.
///
/// Each pass checks up front that the collaborators it needs were supplied.
pub struct Pipeline<'a> {
    store: &'a Storage,
    search: Option<&'a dyn SearchProvider>,
    extractor: Option<&'a dyn Extractor>,
}

impl<'a> Pipeline<'a> {
    pub fn new(store: &'a Storage) -> Self {
        Self {
            store,
            search: None,
            extractor: None,
        }
    }

    pub fn with_search(mut self, search: &'a dyn SearchProvider) -> Self {
        self.search = Some(search);
        self
    }

    pub fn with_extractor(mut self, extractor: &'a dyn Extractor) -> Self {
        self.extractor = Some(extractor);
        self
    }

    fn search(&self) -> Result<&'a dyn SearchProvider> {
        self.search
            .ok_or_else(|| OptoutError::config("no search provider configured"))
    }

    fn extractor(&self) -> Result<&'a dyn Extractor> {
        self.extractor
            .ok_or_else(|| OptoutError::config("no page extractor configured"))
    }

    /// Full pipeline (stage A then B) over pending organizations.
    #[instrument(skip_all, fields(limit = ?limit))]
    pub async fn run_pass(
        &self,
        limit: Option<usize>,
        progress: &dyn ProgressReporter,
    ) -> Result<PassSummary> {
        self.search()?;
        self.extractor()?;
        progress.phase("Resolving contact channels");
        let orgs = take(self.store.list_by_status(OrgStatus::Pending).await?, limit);

        self.drive(&orgs, progress, |org| self.resolve(org)).await
    }

    /// Stage B only, for pending organizations with a cached contact page.
    #[instrument(skip_all, fields(limit = ?limit))]
    pub async fn run_extraction_pass(
        &self,
        limit: Option<usize>,
        progress: &dyn ProgressReporter,
    ) -> Result<PassSummary> {
        self.extractor()?;
        progress.phase("Extracting contacts from known pages");
        let orgs = take(self.store.list_pending_with_contact_page().await?, limit);

        self.drive(&orgs, progress, |org| async move {
            let Some(contact_url) = org.contact_page_url.as_deref() else {
                warn!(org = %org.name, "no cached contact page, skipping");
                return Resolution::Failed;
            };
            self.extract_and_finish(&org.name, contact_url, org.website.clone())
                .await
        })
        .await
    }

    /// Non-terminal website lookup for pending organizations without one.
    ///
    /// Caches the website and logs a `search` attempt; status and the
    /// attempt counter are left alone.
    #[instrument(skip_all, fields(limit = ?limit))]
    pub async fn discover_websites(
        &self,
        limit: Option<usize>,
        progress: &dyn ProgressReporter,
    ) -> Result<PassSummary> {
        let search = self.search()?;
        progress.phase("Searching for websites");
        let orgs = take(self.store.list_pending_without_website().await?, limit);

        self.drive(&orgs, progress, |org| self.lookup_website(search, org))
            .await
    }

    /// Non-terminal stage A sweep: cache website and contact page.
    #[instrument(skip_all, fields(limit = ?limit))]
    pub async fn discover_contact_pages(
        &self,
        limit: Option<usize>,
        progress: &dyn ProgressReporter,
    ) -> Result<PassSummary> {
        self.search()?;
        progress.phase("Searching for contact pages");
        let pending = self.store.list_by_status(OrgStatus::Pending).await?;
        let orgs = take(
            pending
                .into_iter()
                .filter(|o| o.contact_page_url.is_none())
                .collect(),
            limit,
        );

        self.drive(&orgs, progress, |org| async move {
            match self.search_stage(&org.name).await {
                SearchStage::Found(found) => {
                    if self.cache_contact_page(&org.name, &found).await {
                        Resolution::Success
                    } else {
                        Resolution::Failed
                    }
                }
                SearchStage::Failed(err) => {
                    self.log_attempt(
                        &org.name,
                        NewAttempt::new(
                            AttemptType::Search,
                            false,
                            json!({ "lookup": "contact_page", "error": err }),
                        ),
                    )
                    .await;
                    Resolution::Failed
                }
            }
        })
        .await
    }

    /// Sequentially process `orgs`, reporting progress and tallying results.
    async fn drive<'o, F, Fut>(
        &self,
        orgs: &'o [Organization],
        progress: &dyn ProgressReporter,
        mut step: F,
    ) -> Result<PassSummary>
    where
        F: FnMut(&'o Organization) -> Fut,
        Fut: Future<Output = Resolution>,
    {
        let start = Instant::now();
        let mut summary = PassSummary::default();
        let total = orgs.len();

        for (i, org) in orgs.iter().enumerate() {
            progress.org_started(&org.name, i + 1, total);
            let resolution = step(org).await;
            summary.count(resolution);
            progress.org_finished(&org.name, resolution);
        }

        summary.elapsed = start.elapsed();
        info!(
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            manual = summary.manual,
            elapsed_ms = summary.elapsed.as_millis(),
            "pass completed"
        );
        progress.done(&summary);
        Ok(summary)
    }

    // -----------------------------------------------------------------------
    // Per-organization steps
    // -----------------------------------------------------------------------

    #[instrument(skip_all, fields(org = %org.name))]
    async fn resolve(&self, org: &Organization) -> Resolution {
        let found = match self.search_stage(&org.name).await {
            SearchStage::Found(found) => found,
            SearchStage::Failed(err) => {
                let attempt = NewAttempt::new(
                    AttemptType::Search,
                    false,
                    json!({ "lookup": "contact_page", "error": err }),
                );
                return self
                    .finish(&org.name, Outcome::failed(err, None), attempt, Resolution::Failed)
                    .await;
            }
        };

        self.cache_contact_page(&org.name, &found).await;
        let website = org.website.clone().or(Some(found.website_origin));
        self.extract_and_finish(&org.name, &found.contact_url, website)
            .await
    }

    async fn search_stage(&self, org_name: &str) -> SearchStage {
        let search = match self.search() {
            Ok(search) => search,
            Err(e) => return SearchStage::Failed(e.to_string()),
        };
        match search.find_contact_page(org_name).await {
            Ok(found) => SearchStage::Found(found),
            Err(e) => SearchStage::Failed(e.to_string()),
        }
    }

    async fn extract_stage(&self, org_name: &str, contact_url: &str) -> ExtractStage {
        let extractor = match self.extractor() {
            Ok(extractor) => extractor,
            Err(e) => return ExtractStage::Error(e.to_string()),
        };
        match extractor.extract(contact_url).await {
            Ok(extracted) => {
                ExtractStage::Selected(selector::select_channel(org_name, contact_url, &extracted))
            }
            Err(e) => ExtractStage::Error(e.to_string()),
        }
    }

    async fn extract_and_finish(
        &self,
        org_name: &str,
        contact_url: &str,
        website: Option<String>,
    ) -> Resolution {
        match self.extract_stage(org_name, contact_url).await {
            ExtractStage::Error(err) => {
                let attempt = NewAttempt::new(
                    AttemptType::ContactFind,
                    false,
                    json!({ "contact_url": contact_url, "error": err }),
                );
                self.finish(org_name, Outcome::failed(err, website), attempt, Resolution::Failed)
                    .await
            }
            ExtractStage::Selected(selection) => match selection.channel() {
                Some(channel) => {
                    let attempt = NewAttempt::new(
                        AttemptType::ContactFind,
                        true,
                        json!({ "contact_url": contact_url, "selection": selection }),
                    );
                    self.finish(
                        org_name,
                        Outcome::success(channel, website),
                        attempt,
                        Resolution::Success,
                    )
                    .await
                }
                None => {
                    let reason = format!("no email address or contact form found on {contact_url}");
                    let attempt = NewAttempt::new(
                        AttemptType::ContactFind,
                        false,
                        json!({ "contact_url": contact_url, "reason": reason }),
                    );
                    self.finish(
                        org_name,
                        Outcome::manual(reason, website),
                        attempt,
                        Resolution::Manual,
                    )
                    .await
                }
            },
        }
    }

    async fn lookup_website(&self, search: &dyn SearchProvider, org: &Organization) -> Resolution {
        match search.find_website(&org.name).await {
            Ok(found) => {
                let attempt = website_attempt(&found);
                let website = origin_of(&found.url).unwrap_or(found.url);
                match self
                    .store
                    .cache_discovery(&org.name, Some(&website), None, Some(&attempt))
                    .await
                {
                    Ok(()) => Resolution::Success,
                    Err(e) => {
                        error!(org = %org.name, error = %e, "failed to cache website");
                        Resolution::Failed
                    }
                }
            }
            Err(e) => {
                self.log_attempt(
                    &org.name,
                    NewAttempt::new(
                        AttemptType::Search,
                        false,
                        json!({ "lookup": "website", "error": e.to_string() }),
                    ),
                )
                .await;
                Resolution::Failed
            }
        }
    }

    /// Cache stage A's findings with a successful `search` attempt.
    async fn cache_contact_page(&self, org_name: &str, found: &ContactPageMatch) -> bool {
        let attempt = NewAttempt::new(
            AttemptType::Search,
            true,
            json!({
                "lookup": "contact_page",
                "website": found.website_origin,
                "contact_url": found.contact_url,
                "title": found.contact_title,
            }),
        );
        match self
            .store
            .cache_discovery(
                org_name,
                Some(&found.website_origin),
                Some(&found.contact_url),
                Some(&attempt),
            )
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!(org = org_name, error = %e, "failed to cache contact page");
                false
            }
        }
    }

    /// Persist a terminal outcome with its attempt. A storage failure is
    /// logged and reported as [`Resolution::Failed`].
    async fn finish(
        &self,
        org_name: &str,
        outcome: Outcome,
        attempt: NewAttempt,
        resolution: Resolution,
    ) -> Resolution {
        match self.store.record_terminal(org_name, &outcome, &attempt).await {
            Ok(()) => {
                info!(
                    org = org_name,
                    status = %outcome.status,
                    error = outcome.error_message.as_deref().unwrap_or(""),
                    "organization resolved"
                );
                resolution
            }
            Err(e) => {
                error!(org = org_name, error = %e, "failed to record outcome");
                Resolution::Failed
            }
        }
    }

    async fn log_attempt(&self, org_name: &str, attempt: NewAttempt) {
        let written = self
            .store
            .append_attempt(org_name, attempt.attempt_type, attempt.success, attempt.details)
            .await;
        if let Err(e) = written {
            error!(org = org_name, error = %e, "failed to append attempt");
        }
    }
}

fn take(mut orgs: Vec<Organization>, limit: Option<usize>) -> Vec<Organization> {
    if let Some(n) = limit {
        orgs.truncate(n);
    }
    orgs
}

fn website_attempt(found: &WebsiteMatch) -> NewAttempt {
    NewAttempt::new(
        AttemptType::Search,
        true,
        json!({
            "lookup": "website",
            "url": found.url,
            "title": found.title,
            "confidence": found.confidence,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use optout_shared::{Confidence, ContactType, ExtractedContacts};
    use uuid::Uuid;

    // -----------------------------------------------------------------------
    // Fakes
    // -----------------------------------------------------------------------

    #[derive(Clone)]
    enum Reply<T> {
        Ok(T),
        NotFound,
        Fail(&'static str),
    }

    impl<T: Clone> Reply<T> {
        fn into_result(self) -> Result<T> {
            match self {
                Reply::Ok(v) => Ok(v),
                Reply::NotFound => Err(OptoutError::NotFound("no results".into())),
                Reply::Fail(msg) => Err(OptoutError::Collaborator(msg.into())),
            }
        }
    }

    #[derive(Default)]
    struct FakeSearch {
        contact_pages: HashMap<String, Reply<ContactPageMatch>>,
        websites: HashMap<String, Reply<WebsiteMatch>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeSearch {
        fn contact_page(mut self, org: &str, origin: &str, contact_url: &str) -> Self {
            self.contact_pages.insert(
                org.into(),
                Reply::Ok(ContactPageMatch {
                    website_origin: origin.into(),
                    contact_url: contact_url.into(),
                    contact_title: "Contact".into(),
                }),
            );
            self
        }

        fn contact_reply(mut self, org: &str, reply: Reply<ContactPageMatch>) -> Self {
            self.contact_pages.insert(org.into(), reply);
            self
        }

        fn website(mut self, org: &str, reply: Reply<WebsiteMatch>) -> Self {
            self.websites.insert(org.into(), reply);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SearchProvider for FakeSearch {
        async fn find_website(&self, org_name: &str) -> Result<WebsiteMatch> {
            self.calls.lock().unwrap().push(format!("website:{org_name}"));
            self.websites
                .get(org_name)
                .cloned()
                .unwrap_or(Reply::NotFound)
                .into_result()
        }

        async fn find_contact_page(&self, org_name: &str) -> Result<ContactPageMatch> {
            self.calls.lock().unwrap().push(format!("contact:{org_name}"));
            self.contact_pages
                .get(org_name)
                .cloned()
                .unwrap_or(Reply::NotFound)
                .into_result()
        }
    }

    #[derive(Default)]
    struct FakeExtractor {
        pages: HashMap<String, Reply<ExtractedContacts>>,
    }

    impl FakeExtractor {
        fn page(mut self, url: &str, emails: &[&str], has_form: bool) -> Self {
            self.pages.insert(
                url.into(),
                Reply::Ok(ExtractedContacts {
                    emails: emails.iter().map(|e| e.to_string()).collect(),
                    has_form,
                    form_url: None,
                }),
            );
            self
        }

        fn failing(mut self, url: &str, msg: &'static str) -> Self {
            self.pages.insert(url.into(), Reply::Fail(msg));
            self
        }
    }

    #[async_trait]
    impl Extractor for FakeExtractor {
        async fn extract(&self, url: &str) -> Result<ExtractedContacts> {
            self.pages
                .get(url)
                .cloned()
                .unwrap_or(Reply::Fail("unexpected url"))
                .into_result()
        }
    }

    async fn temp_store(names: &[&str]) -> (Storage, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("optout-pipeline-test-{}", Uuid::now_v7()));
        let storage = Storage::open(&dir.join("test.db")).await.unwrap();
        storage.import(names.iter().copied()).await.unwrap();
        (storage, dir)
    }

    const CONTACT_URL: &str = "https://acme.org/contact";

    // -----------------------------------------------------------------------
    // End-to-end passes
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn search_error_marks_failed() {
        let (store, dir) = temp_store(&["Acme Org"]).await;
        let search = FakeSearch::default().contact_reply("Acme Org", Reply::Fail("HTTP 500"));
        let extractor = FakeExtractor::default();

        let summary = Pipeline::new(&store)
            .with_search(&search)
            .with_extractor(&extractor)
            .run_pass(None, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(summary.failed, 1);

        let org = store.get("Acme Org").await.unwrap().unwrap();
        assert_eq!(org.status, OrgStatus::Failed);
        assert_eq!(org.attempts, 1);
        assert!(org.last_attempt_at.is_some());
        assert!(org.error_message.unwrap().contains("HTTP 500"));

        let attempts = store.list_attempts("Acme Org").await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].attempt_type, AttemptType::Search);
        assert!(!attempts[0].success);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn form_without_action_uses_contact_url() {
        let (store, dir) = temp_store(&["Acme Org"]).await;
        let search =
            FakeSearch::default().contact_page("Acme Org", "https://acme.org", CONTACT_URL);
        let extractor = FakeExtractor::default().page(CONTACT_URL, &[], true);

        let summary = Pipeline::new(&store)
            .with_search(&search)
            .with_extractor(&extractor)
            .run_pass(None, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(summary.succeeded, 1);

        let org = store.get("Acme Org").await.unwrap().unwrap();
        assert_eq!(org.status, OrgStatus::Success);
        assert_eq!(org.contact_type, ContactType::Form);
        assert_eq!(org.contact_value.as_deref(), Some(CONTACT_URL));
        assert_eq!(org.website.as_deref(), Some("https://acme.org"));
        assert_eq!(org.contact_page_url.as_deref(), Some(CONTACT_URL));
        assert_eq!(org.attempts, 1);

        let attempts = store.list_attempts("Acme Org").await.unwrap();
        let kinds: Vec<_> = attempts.iter().map(|a| (a.attempt_type, a.success)).collect();
        assert_eq!(
            kinds,
            vec![(AttemptType::Search, true), (AttemptType::ContactFind, true)]
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn nothing_found_is_manual() {
        let (store, dir) = temp_store(&["Acme Org"]).await;
        let search =
            FakeSearch::default().contact_page("Acme Org", "https://acme.org", CONTACT_URL);
        let extractor = FakeExtractor::default().page(CONTACT_URL, &[], false);

        let summary = Pipeline::new(&store)
            .with_search(&search)
            .with_extractor(&extractor)
            .run_pass(None, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(summary.manual, 1);

        let org = store.get("Acme Org").await.unwrap().unwrap();
        assert_eq!(org.status, OrgStatus::Manual);
        assert_eq!(org.contact_type, ContactType::None);
        assert_eq!(org.contact_value, None);
        assert_eq!(org.attempts, 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn extraction_error_is_failed_not_manual() {
        let (store, dir) = temp_store(&["Acme Org"]).await;
        let search =
            FakeSearch::default().contact_page("Acme Org", "https://acme.org", CONTACT_URL);
        let extractor = FakeExtractor::default().failing(CONTACT_URL, "timed out");

        Pipeline::new(&store)
            .with_search(&search)
            .with_extractor(&extractor)
            .run_pass(None, &SilentProgress)
            .await
            .unwrap();

        let org = store.get("Acme Org").await.unwrap().unwrap();
        assert_eq!(org.status, OrgStatus::Failed);
        assert_eq!(org.website.as_deref(), Some("https://acme.org"));

        let attempts = store.list_attempts("Acme Org").await.unwrap();
        let last = attempts.last().unwrap();
        assert_eq!(last.attempt_type, AttemptType::ContactFind);
        assert!(!last.success);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_pass() {
        let (store, dir) = temp_store(&["Acme Org", "Beta Org", "Gamma Org"]).await;
        let search = FakeSearch::default()
            .contact_page("Acme Org", "https://acme.org", CONTACT_URL)
            .contact_reply("Beta Org", Reply::Fail("boom"))
            .contact_page("Gamma Org", "https://gamma.org", "https://gamma.org/contact");
        let extractor = FakeExtractor::default()
            .page(CONTACT_URL, &["jane@acme.org", "info@acme.org"], true)
            .page("https://gamma.org/contact", &["hello@gamma.org"], false);

        let summary = Pipeline::new(&store)
            .with_search(&search)
            .with_extractor(&extractor)
            .run_pass(None, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);

        let acme = store.get("Acme Org").await.unwrap().unwrap();
        assert_eq!(acme.contact_type, ContactType::Both);
        assert_eq!(acme.contact_value.as_deref(), Some("info@acme.org"));

        let gamma = store.get("Gamma Org").await.unwrap().unwrap();
        assert_eq!(gamma.contact_type, ContactType::Email);

        // Processed in name order.
        assert_eq!(
            search.calls(),
            vec!["contact:Acme Org", "contact:Beta Org", "contact:Gamma Org"]
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn no_search_result_marks_failed() {
        let (store, dir) = temp_store(&["Acme Org"]).await;
        let search = FakeSearch::default().contact_reply("Acme Org", Reply::NotFound);
        let extractor = FakeExtractor::default();

        let summary = Pipeline::new(&store)
            .with_search(&search)
            .with_extractor(&extractor)
            .run_pass(None, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.manual, 0);

        let org = store.get("Acme Org").await.unwrap().unwrap();
        assert_eq!(org.status, OrgStatus::Failed);
        assert_eq!(org.attempts, 1);
        assert!(org.last_attempt_at.is_some());
        assert_eq!(org.contact_page_url, None);
        assert!(org.error_message.unwrap().contains("no results"));

        let attempts = store.list_attempts("Acme Org").await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].attempt_type, AttemptType::Search);
        assert!(!attempts[0].success);
        assert_eq!(attempts[0].details["lookup"], "contact_page");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn limit_and_terminal_orgs_are_respected() {
        let (store, dir) = temp_store(&["Acme Org", "Beta Org", "Gamma Org"]).await;
        store
            .record_outcome("Acme Org", &Outcome::failed("earlier", None))
            .await
            .unwrap();
        let search = FakeSearch::default();
        let extractor = FakeExtractor::default();

        let summary = Pipeline::new(&store)
            .with_search(&search)
            .with_extractor(&extractor)
            .run_pass(Some(1), &SilentProgress)
            .await
            .unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(search.calls(), vec!["contact:Beta Org"]);

        let beta = store.get("Beta Org").await.unwrap().unwrap();
        assert_eq!(beta.status, OrgStatus::Failed);
        assert_eq!(beta.attempts, 1);
        let gamma = store.get("Gamma Org").await.unwrap().unwrap();
        assert_eq!(gamma.status, OrgStatus::Pending);
        assert_eq!(gamma.attempts, 0);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn existing_website_is_kept() {
        let (store, dir) = temp_store(&["Acme Org"]).await;
        store
            .cache_discovery("Acme Org", Some("https://www.acme.org"), None, None)
            .await
            .unwrap();
        let search =
            FakeSearch::default().contact_page("Acme Org", "https://acme.org", CONTACT_URL);
        let extractor = FakeExtractor::default().page(CONTACT_URL, &["info@acme.org"], false);

        Pipeline::new(&store)
            .with_search(&search)
            .with_extractor(&extractor)
            .run_pass(None, &SilentProgress)
            .await
            .unwrap();

        let org = store.get("Acme Org").await.unwrap().unwrap();
        assert_eq!(org.website.as_deref(), Some("https://www.acme.org"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    // -----------------------------------------------------------------------
    // Partial passes
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn contact_search_then_extraction_pass() {
        let (store, dir) = temp_store(&["Acme Org", "Beta Org"]).await;
        let search = FakeSearch::default()
            .contact_page("Acme Org", "https://acme.org", CONTACT_URL);
        let extractor = FakeExtractor::default().page(CONTACT_URL, &["info@acme.org"], false);
        let pipeline = Pipeline::new(&store)
            .with_search(&search)
            .with_extractor(&extractor);

        let found = pipeline
            .discover_contact_pages(None, &SilentProgress)
            .await
            .unwrap();
        assert_eq!((found.succeeded, found.failed), (1, 1));

        // Non-terminal: still pending, attempts unchanged.
        let acme = store.get("Acme Org").await.unwrap().unwrap();
        assert_eq!(acme.status, OrgStatus::Pending);
        assert_eq!(acme.attempts, 0);
        assert_eq!(acme.contact_page_url.as_deref(), Some(CONTACT_URL));
        let beta_attempts = store.list_attempts("Beta Org").await.unwrap();
        assert_eq!(beta_attempts.len(), 1);
        assert!(!beta_attempts[0].success);

        let extracted = pipeline
            .run_extraction_pass(None, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(extracted.processed, 1);
        assert_eq!(extracted.succeeded, 1);

        let acme = store.get("Acme Org").await.unwrap().unwrap();
        assert_eq!(acme.status, OrgStatus::Success);
        assert_eq!(acme.contact_value.as_deref(), Some("info@acme.org"));
        let beta = store.get("Beta Org").await.unwrap().unwrap();
        assert_eq!(beta.status, OrgStatus::Pending);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn website_discovery_caches_origin() {
        let (store, dir) = temp_store(&["Acme Org", "Beta Org"]).await;
        let search = FakeSearch::default()
            .website(
                "Acme Org",
                Reply::Ok(WebsiteMatch {
                    url: "https://acme.org/home?ref=x".into(),
                    title: "Acme Org".into(),
                    confidence: Confidence::High,
                }),
            )
            .website("Beta Org", Reply::Fail("rate limited"));
        let extractor = FakeExtractor::default();

        let summary = Pipeline::new(&store)
            .with_search(&search)
            .with_extractor(&extractor)
            .discover_websites(None, &SilentProgress)
            .await
            .unwrap();
        assert_eq!((summary.succeeded, summary.failed), (1, 1));

        let acme = store.get("Acme Org").await.unwrap().unwrap();
        assert_eq!(acme.website.as_deref(), Some("https://acme.org"));
        assert_eq!(acme.status, OrgStatus::Pending);
        assert_eq!(acme.attempts, 0);

        let attempts = store.list_attempts("Acme Org").await.unwrap();
        assert_eq!(attempts[0].details["confidence"], "high");

        let beta = store.get("Beta Org").await.unwrap().unwrap();
        assert_eq!(beta.website, None);
        assert_eq!(store.list_attempts("Beta Org").await.unwrap().len(), 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn missing_collaborators_fail_before_any_work() {
        let (store, dir) = temp_store(&["Acme Org"]).await;
        let extractor = FakeExtractor::default();

        let err = Pipeline::new(&store)
            .with_extractor(&extractor)
            .run_pass(None, &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, OptoutError::Config { .. }));

        let err = Pipeline::new(&store)
            .discover_websites(None, &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, OptoutError::Config { .. }));

        // Extraction alone needs no search provider.
        let summary = Pipeline::new(&store)
            .with_extractor(&extractor)
            .run_extraction_pass(None, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(summary.processed, 0);

        let org = store.get("Acme Org").await.unwrap().unwrap();
        assert_eq!(org.attempts, 0);
        assert!(store.list_attempts("Acme Org").await.unwrap().is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
