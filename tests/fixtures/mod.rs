//! Sample links and rendered pages for pipeline tests
#![allow(dead_code)]

/// A submitted URL together with what the pipeline should make of it
#[derive(Debug, Clone)]
pub struct LinkFixture {
    pub submitted: &'static str,
    pub normalized: &'static str,
    pub description: &'static str,
}

pub const LINK_FIXTURES: &[LinkFixture] = &[
    LinkFixture {
        submitted: "https://boards.example.com/acme/jobs/4821?utm_source=discord&utm_medium=chat",
        normalized: "https://boards.example.com/acme/jobs/4821",
        description: "Campaign parameters only",
    },
    LinkFixture {
        submitted: "  https://CAREERS.Example.org:443/positions/77?gh_jid=77&ref=newsletter#apply  ",
        normalized: "https://careers.example.org/positions/77?gh_jid=77",
        description: "Default port, mixed-case host, ref and fragment",
    },
    LinkFixture {
        submitted: "https://jobs.example.net/view?id=12&fbclid=IwAR0abc",
        normalized: "https://jobs.example.net/view?id=12",
        description: "Click id mixed with a real parameter",
    },
];

/// innerText of a typical rendered posting
pub const POSTING_TEXT: &str = "Acme Robotics\n\
Senior Backend Engineer\n\
Remote (US) · Full-time\n\
Posted May 1, 2024\n\
We are looking for an engineer to build and operate the APIs behind our fleet \
management platform. You will own services end to end.";

/// Raw model output for `POSTING_TEXT`
pub const POSTING_EXTRACTION: &str = r#"{
    "jobTitle": "Senior Backend Engineer",
    "companyName": "Acme Robotics",
    "location": "Remote",
    "jobFunction": "Software Engineering",
    "jobType": "Full-time",
    "datePosted": "2024-05-01",
    "jobDescription": "Build and operate the APIs behind a fleet management platform.",
    "aiScore": 95,
    "aiNote": "Single open role with title, company and description"
}"#;

/// A client-rendered page whose body innerText is empty until scripts run
pub const SCRIPT_SHELL_HTML: &str = r#"<html>
<head><title>Careers</title><script>window.__DATA__ = {}</script></head>
<body>
  <div id="root">
    <h1>Data Scientist</h1>
    <p>Globex · Hybrid</p>
  </div>
  <script>render()</script>
</body>
</html>"#;
