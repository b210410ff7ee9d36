pub mod mattermost;
